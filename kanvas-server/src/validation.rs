//! Input validation for untrusted data.
//!
//! All user-supplied input MUST be validated before use.
//! This module provides validators for common data types.

use thiserror::Error;
use url::Url;

/// Maximum length for project IDs.
pub const MAX_PROJECT_ID_LEN: usize = 64;
/// Maximum length for owner IDs.
pub const MAX_OWNER_ID_LEN: usize = 128;
/// Maximum prompt length in characters.
pub const MAX_PROMPT_LEN: usize = 4_000;
/// Maximum number of outputs a single generation request may ask for.
pub const MAX_GENERATION_COUNT: usize = 8;
/// Maximum width or height of a generated image, in pixels.
pub const MAX_DIMENSION: u32 = 4_096;
/// Maximum elements per project.
pub const MAX_ELEMENTS_PER_PROJECT: usize = 10_000;
/// Maximum length for media URLs.
pub const MAX_URL_LEN: usize = 2_048;

/// Validation error types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Project ID exceeds maximum length.
    #[error("project_id too long (max {MAX_PROJECT_ID_LEN} chars)")]
    ProjectIdTooLong,
    /// Project ID is empty or contains invalid characters.
    #[error("project_id contains invalid characters")]
    ProjectIdInvalidChars,
    /// Owner ID is empty, too long or contains control characters.
    #[error("owner id is invalid (1-{MAX_OWNER_ID_LEN} printable chars)")]
    OwnerIdInvalid,
    /// Prompt is empty after trimming.
    #[error("prompt must not be empty")]
    PromptEmpty,
    /// Prompt exceeds maximum length.
    #[error("prompt too long (max {MAX_PROMPT_LEN} chars)")]
    PromptTooLong,
    /// Requested output count is out of range.
    #[error("count must be between 1 and {MAX_GENERATION_COUNT}")]
    InvalidCount,
    /// Width or height is out of range.
    #[error("dimensions must be between 1 and {MAX_DIMENSION} pixels")]
    InvalidDimensions,
    /// Too many elements in project.
    #[error("too many elements (max {MAX_ELEMENTS_PER_PROJECT})")]
    TooManyElements,
    /// URL is malformed or not http(s).
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl ValidationError {
    /// Short label used for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProjectIdTooLong | Self::ProjectIdInvalidChars => "project_id",
            Self::OwnerIdInvalid => "owner_id",
            Self::PromptEmpty | Self::PromptTooLong => "prompt",
            Self::InvalidCount => "count",
            Self::InvalidDimensions => "dimensions",
            Self::TooManyElements => "element_count",
            Self::InvalidUrl(_) => "url",
        }
    }
}

/// Check if a character is valid for IDs (ASCII alphanumeric, hyphen, or underscore).
fn is_valid_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Validate a project ID.
///
/// Valid project IDs:
/// - 1-64 characters
/// - Alphanumeric, hyphen, underscore only
///
/// # Errors
///
/// Returns [`ValidationError::ProjectIdTooLong`] if the ID exceeds 64 characters.
/// Returns [`ValidationError::ProjectIdInvalidChars`] if the ID is empty or contains invalid characters.
pub fn validate_project_id(id: &str) -> Result<(), ValidationError> {
    if id.len() > MAX_PROJECT_ID_LEN {
        return Err(ValidationError::ProjectIdTooLong);
    }
    if id.is_empty() || !id.chars().all(is_valid_id_char) {
        return Err(ValidationError::ProjectIdInvalidChars);
    }
    Ok(())
}

/// Validate an owner ID taken from the request headers.
///
/// # Errors
///
/// Returns [`ValidationError::OwnerIdInvalid`] if the ID is empty, too long,
/// or contains whitespace or control characters.
pub fn validate_owner_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty()
        || id.len() > MAX_OWNER_ID_LEN
        || id.chars().any(|c| c.is_control() || c.is_whitespace())
    {
        return Err(ValidationError::OwnerIdInvalid);
    }
    Ok(())
}

/// Validate a generation prompt.
///
/// # Errors
///
/// Returns [`ValidationError::PromptEmpty`] for blank prompts and
/// [`ValidationError::PromptTooLong`] past 4000 characters.
pub fn validate_prompt(prompt: &str) -> Result<(), ValidationError> {
    if prompt.trim().is_empty() {
        return Err(ValidationError::PromptEmpty);
    }
    if prompt.chars().count() > MAX_PROMPT_LEN {
        return Err(ValidationError::PromptTooLong);
    }
    Ok(())
}

/// Validate the number of outputs requested.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidCount`] unless `1 <= count <= 8`.
pub fn validate_count(count: usize) -> Result<(), ValidationError> {
    if count == 0 || count > MAX_GENERATION_COUNT {
        return Err(ValidationError::InvalidCount);
    }
    Ok(())
}

/// Validate requested output dimensions.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidDimensions`] if either side is zero or
/// above 4096 pixels.
pub fn validate_dimensions(width: u32, height: u32) -> Result<(), ValidationError> {
    let valid = |side: u32| (1..=MAX_DIMENSION).contains(&side);
    if !valid(width) || !valid(height) {
        return Err(ValidationError::InvalidDimensions);
    }
    Ok(())
}

/// Validate the element count a project would have after a change.
///
/// # Errors
///
/// Returns [`ValidationError::TooManyElements`] if `count` exceeds the limit.
pub fn validate_element_count(count: usize) -> Result<(), ValidationError> {
    if count > MAX_ELEMENTS_PER_PROJECT {
        return Err(ValidationError::TooManyElements);
    }
    Ok(())
}

/// Validate a media URL.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidUrl`] if the URL is too long, does not
/// parse, or is not `http`/`https`.
pub fn validate_url(raw: &str) -> Result<(), ValidationError> {
    if raw.len() > MAX_URL_LEN {
        return Err(ValidationError::InvalidUrl("too long".into()));
    }
    let url = Url::parse(raw).map_err(|e| ValidationError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ValidationError::InvalidUrl(format!(
            "unsupported scheme {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_project_ids() {
        assert!(validate_project_id("default").is_ok());
        assert!(validate_project_id("my-project").is_ok());
        assert!(validate_project_id("project_123").is_ok());
        assert!(validate_project_id("a").is_ok());
        assert!(validate_project_id("550e8400-e29b-41d4-a716-446655440000").is_ok());
    }

    #[test]
    fn test_invalid_project_ids() {
        assert!(validate_project_id("").is_err());
        assert!(validate_project_id("has spaces").is_err());
        assert!(validate_project_id("has/slash").is_err());
        assert!(validate_project_id("../../../etc/passwd").is_err());
        assert!(validate_project_id("path\\traversal").is_err());
        assert!(validate_project_id("contains<script>").is_err());
        assert!(validate_project_id("ünïcode").is_err());
    }

    #[test]
    fn test_project_id_boundary() {
        // Exactly at limit should pass
        let at_limit = "x".repeat(MAX_PROJECT_ID_LEN);
        assert!(validate_project_id(&at_limit).is_ok());

        // One over should fail
        let over_limit = "x".repeat(MAX_PROJECT_ID_LEN + 1);
        assert_eq!(
            validate_project_id(&over_limit),
            Err(ValidationError::ProjectIdTooLong)
        );
    }

    #[test]
    fn test_owner_ids() {
        assert!(validate_owner_id("user_2abc").is_ok());
        assert!(validate_owner_id("anonymous").is_ok());
        assert!(validate_owner_id("").is_err());
        assert!(validate_owner_id("two words").is_err());
        assert!(validate_owner_id("line\nbreak").is_err());
        assert!(validate_owner_id(&"u".repeat(MAX_OWNER_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_prompt() {
        assert!(validate_prompt("a red fox in the snow").is_ok());
        assert_eq!(validate_prompt("   "), Err(ValidationError::PromptEmpty));
        assert!(validate_prompt(&"x".repeat(MAX_PROMPT_LEN)).is_ok());
        assert_eq!(
            validate_prompt(&"x".repeat(MAX_PROMPT_LEN + 1)),
            Err(ValidationError::PromptTooLong)
        );
    }

    #[test]
    fn test_prompt_length_counts_chars() {
        // Multi-byte characters count once each
        assert!(validate_prompt(&"é".repeat(MAX_PROMPT_LEN)).is_ok());
    }

    #[test]
    fn test_count() {
        assert!(validate_count(0).is_err());
        assert!(validate_count(1).is_ok());
        assert!(validate_count(MAX_GENERATION_COUNT).is_ok());
        assert!(validate_count(MAX_GENERATION_COUNT + 1).is_err());
    }

    #[test]
    fn test_dimensions() {
        assert!(validate_dimensions(1024, 768).is_ok());
        assert!(validate_dimensions(0, 768).is_err());
        assert!(validate_dimensions(1024, MAX_DIMENSION + 1).is_err());
    }

    #[test]
    fn test_element_count() {
        assert!(validate_element_count(0).is_ok());
        assert!(validate_element_count(MAX_ELEMENTS_PER_PROJECT).is_ok());
        assert!(validate_element_count(MAX_ELEMENTS_PER_PROJECT + 1).is_err());
    }

    #[test]
    fn test_url() {
        assert!(validate_url("https://cdn.example/a.png").is_ok());
        assert!(validate_url("http://localhost:9000/x").is_ok());
        assert!(validate_url("file:///etc/passwd").is_err());
        assert!(validate_url("not a url").is_err());
        let long = format!("https://cdn.example/{}", "a".repeat(MAX_URL_LEN));
        assert!(validate_url(&long).is_err());
    }

    #[test]
    fn test_error_messages() {
        let err = ValidationError::ProjectIdTooLong;
        assert!(err.to_string().contains("64"));

        let err = ValidationError::PromptTooLong;
        assert!(err.to_string().contains("4000"));
        assert_eq!(err.kind(), "prompt");
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_safe_project_ids_are_accepted(id in "[A-Za-z0-9_-]{1,64}") {
                prop_assert!(validate_project_id(&id).is_ok());
            }

            #[test]
            fn prop_ids_with_separators_are_rejected(
                head in "[a-z]{1,10}",
                sep in prop::sample::select(vec!['/', '.', ' ', '\\']),
                tail in "[a-z]{1,10}",
            ) {
                let id = format!("{head}{sep}{tail}");
                prop_assert!(validate_project_id(&id).is_err());
            }
        }
    }
}
