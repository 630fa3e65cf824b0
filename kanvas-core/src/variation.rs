//! Variation prompts and placement for batch generations around a source image.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::element::Rect;

/// Camera angle variations.
pub const CAMERA_ANGLES: &[&str] = &[
    "low angle shot looking up",
    "high angle shot looking down",
    "bird's eye view from directly above",
    "dutch angle with a tilted horizon",
    "extreme close-up",
    "wide establishing shot",
    "over-the-shoulder shot",
    "eye-level medium shot",
    "worm's eye view from the ground",
    "three-quarter profile view",
    "rear view from behind the subject",
    "telephoto shot with compressed perspective",
];

/// Weather and atmosphere variations.
pub const WEATHER_CONDITIONS: &[&str] = &[
    "heavy rain with wet reflective surfaces",
    "dense morning fog",
    "falling snow",
    "golden hour sunlight",
    "thunderstorm with lightning in the distance",
    "overcast diffuse light",
    "clear night under a full moon",
    "sandstorm haze",
    "light drizzle after sunset",
    "bright midday sun with hard shadows",
];

/// Director style variations.
pub const DIRECTOR_STYLES: &[&str] = &[
    "in the style of Wes Anderson, symmetrical pastel composition",
    "in the style of Denis Villeneuve, vast brutalist scale",
    "in the style of Wong Kar-wai, saturated neon and motion blur",
    "in the style of Stanley Kubrick, one-point perspective",
    "in the style of Christopher Nolan, practical IMAX realism",
    "in the style of Hayao Miyazaki, hand-painted animation",
    "in the style of Ridley Scott, smoky backlit atmosphere",
    "in the style of Sofia Coppola, soft natural light",
    "in the style of Tim Burton, gothic whimsy",
    "in the style of Akira Kurosawa, dramatic weather and wide frames",
];

/// Which prompt pool to draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariationKind {
    /// Different camera angles.
    CameraAngle,
    /// Different weather.
    Weather,
    /// Different director styles.
    DirectorStyle,
}

impl VariationKind {
    /// The prompt pool for this kind.
    #[must_use]
    pub fn pool(self) -> &'static [&'static str] {
        match self {
            Self::CameraAngle => CAMERA_ANGLES,
            Self::Weather => WEATHER_CONDITIONS,
            Self::DirectorStyle => DIRECTOR_STYLES,
        }
    }
}

/// Pick `count` distinct entries from `pool` with a partial Fisher-Yates shuffle.
///
/// `count` is capped at the pool size, so no entry repeats within one batch.
pub fn select_unique<'a, T, R>(pool: &'a [T], count: usize, rng: &mut R) -> Vec<&'a T>
where
    R: Rng + ?Sized,
{
    let count = count.min(pool.len());
    let mut indices: Vec<usize> = (0..pool.len()).collect();
    for i in 0..count {
        let j = rng.random_range(i..indices.len());
        indices.swap(i, j);
    }
    indices[..count].iter().map(|&i| &pool[i]).collect()
}

/// Build `count` variation prompts for `base_prompt`.
pub fn variation_prompts<R>(
    kind: VariationKind,
    base_prompt: &str,
    count: usize,
    rng: &mut R,
) -> Vec<String>
where
    R: Rng + ?Sized,
{
    let base = base_prompt.trim();
    select_unique(kind.pool(), count, rng)
        .into_iter()
        .map(|modifier| {
            if base.is_empty() {
                (*modifier).to_string()
            } else {
                format!("{base}, {modifier}")
            }
        })
        .collect()
}

/// Positions for `count` results laid out on the rings of cells around `source`.
///
/// The first ring holds eight cells starting to the right and going clockwise;
/// later rings continue outward. Each cell has the size of the source.
#[must_use]
pub fn placements_around(source: Rect, count: usize, gap: f64) -> Vec<Rect> {
    let step_x = source.width + gap;
    let step_y = source.height + gap;
    let mut placements = Vec::with_capacity(count);
    let mut ring: i64 = 1;

    while placements.len() < count {
        for (col, row) in ring_cells(ring) {
            if placements.len() == count {
                break;
            }
            #[allow(clippy::cast_precision_loss)]
            placements.push(Rect::new(
                source.x + col as f64 * step_x,
                source.y + row as f64 * step_y,
                source.width,
                source.height,
            ));
        }
        ring += 1;
    }
    placements
}

/// Cells on the square ring at distance `r`, starting right-middle, clockwise.
fn ring_cells(r: i64) -> Vec<(i64, i64)> {
    let mut cells = Vec::new();
    // right edge, going down from the middle
    for row in 0..=r {
        cells.push((r, row));
    }
    // bottom edge, right to left
    for col in (-r..r).rev() {
        cells.push((col, r));
    }
    // left edge, bottom to top
    for row in (-r..r).rev() {
        cells.push((-r, row));
    }
    // top edge, left to right
    for col in (-r + 1)..=r {
        cells.push((col, -r));
    }
    // right edge, top back to the middle
    for row in (-r + 1)..0 {
        cells.push((r, row));
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_select_unique_never_repeats() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let picked = select_unique(CAMERA_ANGLES, 6, &mut rng);
            let distinct: HashSet<_> = picked.iter().collect();
            assert_eq!(distinct.len(), 6);
        }
    }

    #[test]
    fn test_select_unique_caps_at_pool_size() {
        let mut rng = StdRng::seed_from_u64(1);
        let picked = select_unique(WEATHER_CONDITIONS, 100, &mut rng);
        assert_eq!(picked.len(), WEATHER_CONDITIONS.len());
    }

    #[test]
    fn test_select_unique_empty_pool() {
        let mut rng = StdRng::seed_from_u64(1);
        let pool: [&str; 0] = [];
        assert!(select_unique(&pool, 3, &mut rng).is_empty());
    }

    #[test]
    fn test_variation_prompts_prefix_base() {
        let mut rng = StdRng::seed_from_u64(3);
        let prompts = variation_prompts(VariationKind::Weather, " a lighthouse ", 4, &mut rng);
        assert_eq!(prompts.len(), 4);
        assert!(prompts.iter().all(|p| p.starts_with("a lighthouse, ")));
    }

    #[test]
    fn test_ring_cells_cover_ring_once() {
        for r in 1..4 {
            let cells = ring_cells(r);
            let distinct: HashSet<_> = cells.iter().collect();
            assert_eq!(cells.len(), distinct.len());
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            let expected = (8 * r) as usize;
            assert_eq!(cells.len(), expected);
            assert_eq!(cells[0], (r, 0));
        }
    }

    #[test]
    fn test_placements_around_first_ring() {
        let source = Rect::new(0.0, 0.0, 100.0, 50.0);
        let placements = placements_around(source, 8, 10.0);
        assert_eq!(placements.len(), 8);
        assert_eq!(placements[0], Rect::new(110.0, 0.0, 100.0, 50.0));
        assert_eq!(placements[1], Rect::new(110.0, 60.0, 100.0, 50.0));
        assert!(placements.iter().all(|p| !p.intersects(&Rect::new(1.0, 1.0, 98.0, 48.0))));
    }

    #[test]
    fn test_placements_spill_to_second_ring() {
        let source = Rect::new(0.0, 0.0, 10.0, 10.0);
        let placements = placements_around(source, 10, 0.0);
        assert_eq!(placements.len(), 10);
        assert_eq!(placements[8], Rect::new(20.0, 0.0, 10.0, 10.0));
    }

    proptest! {
        #[test]
        fn prop_selection_is_distinct(seed in any::<u64>(), count in 0usize..20) {
            let mut rng = StdRng::seed_from_u64(seed);
            let picked = select_unique(DIRECTOR_STYLES, count, &mut rng);
            let distinct: HashSet<_> = picked.iter().collect();
            prop_assert_eq!(picked.len(), count.min(DIRECTOR_STYLES.len()));
            prop_assert_eq!(distinct.len(), picked.len());
        }
    }
}
