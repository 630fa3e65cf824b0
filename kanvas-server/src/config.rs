//! Server configuration from command-line flags and `KANVAS_*` variables.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use kanvas_core::AutosaveConfig;

use crate::orchestrator::{ModelConfig, OrchestratorConfig, PollConfig};
use crate::retry::RetryConfig;

/// Default port for the kanvas server.
pub const DEFAULT_PORT: u16 = 9474;

/// Command-line arguments for the kanvas server.
#[derive(Debug, Clone, Parser)]
#[command(name = "kanvas")]
#[command(about = "Kanvas infinite canvas studio server")]
#[command(version)]
pub struct Config {
    /// Port to listen on (localhost only)
    #[arg(long, env = "KANVAS_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory for project JSON files; in-memory only when unset
    #[arg(long, env = "KANVAS_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Generation provider queue URL
    #[arg(long, env = "KANVAS_PROVIDER_URL", default_value = "https://queue.fal.run")]
    pub provider_url: String,

    /// Generation provider API key
    #[arg(long, env = "KANVAS_PROVIDER_KEY", hide_env_values = true)]
    pub provider_key: Option<String>,

    /// Media storage backend URL; results keep provider URLs when unset
    #[arg(long, env = "KANVAS_STORAGE_URL")]
    pub storage_url: Option<String>,

    /// Quiet period before a changed project is written
    #[arg(long, env = "KANVAS_AUTOSAVE_DEBOUNCE_MS", default_value_t = 1500)]
    pub autosave_debounce_ms: u64,

    /// Longest a change may stay unsaved
    #[arg(long, env = "KANVAS_AUTOSAVE_MAX_DELAY_SECS", default_value_t = 30)]
    pub autosave_max_delay_secs: u64,

    /// Time limit for image generations
    #[arg(long, env = "KANVAS_IMAGE_TIMEOUT_SECS", default_value_t = 120)]
    pub image_timeout_secs: u64,

    /// Time limit for video generations
    #[arg(long, env = "KANVAS_VIDEO_TIMEOUT_SECS", default_value_t = 600)]
    pub video_timeout_secs: u64,

    /// Delay between generation status checks
    #[arg(long, env = "KANVAS_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Attempts per provider or storage call
    #[arg(long, env = "KANVAS_RETRY_ATTEMPTS", default_value_t = 3)]
    pub retry_attempts: u32,

    /// First retry delay; doubles on each attempt
    #[arg(long, env = "KANVAS_RETRY_DELAY_MS", default_value_t = 500)]
    pub retry_delay_ms: u64,

    /// Image model identifier
    #[arg(long, env = "KANVAS_IMAGE_MODEL", default_value = "fal-ai/flux/dev")]
    pub image_model: String,

    /// Video model identifier
    #[arg(long, env = "KANVAS_VIDEO_MODEL", default_value = "fal-ai/ltx-video")]
    pub video_model: String,

    /// Structured-prompt model identifier
    #[arg(long, env = "KANVAS_ANALYZE_MODEL", default_value = "fal-ai/llava-next")]
    pub analyze_model: String,

    /// How long finished generations stay queryable
    #[arg(long, env = "KANVAS_GENERATION_RETENTION_SECS", default_value_t = 3600)]
    pub generation_retention_secs: u64,
}

impl Config {
    /// Retry policy for network calls.
    #[must_use]
    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new(self.retry_attempts, self.retry_delay_ms, 8_000, 2.0)
    }

    /// Polling cadence and timeouts.
    #[must_use]
    pub fn poll(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            image_timeout: Duration::from_secs(self.image_timeout_secs),
            video_timeout: Duration::from_secs(self.video_timeout_secs),
        }
    }

    /// Autosave timing.
    #[must_use]
    pub fn autosave(&self) -> AutosaveConfig {
        AutosaveConfig {
            debounce: Duration::from_millis(self.autosave_debounce_ms),
            max_delay: Duration::from_secs(self.autosave_max_delay_secs),
        }
    }

    /// Provider model identifiers.
    #[must_use]
    pub fn models(&self) -> ModelConfig {
        ModelConfig {
            image: self.image_model.clone(),
            video: self.video_model.clone(),
            analyze: self.analyze_model.clone(),
        }
    }

    /// Orchestrator settings.
    #[must_use]
    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            retry: self.retry(),
            poll: self.poll(),
            models: self.models(),
        }
    }

    /// Retention window for finished generations.
    #[must_use]
    pub fn generation_retention(&self) -> Duration {
        Duration::from_secs(self.generation_retention_secs)
    }
}
