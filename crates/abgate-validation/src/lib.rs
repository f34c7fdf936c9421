//! Validation for experiment and variant records.
//!
//! The statistics functions never validate; callers that read records from the
//! outside world run them through here first.

pub use abgate_error::ValidationError;

/// Maximum identifier length, in characters.
pub const ID_MAX_LEN: usize = 64;

/// Validate an experiment or variant identifier.
///
/// Identifiers are non-empty, at most [`ID_MAX_LEN`] characters, and restricted
/// to ASCII alphanumerics plus `_`, `-` and `.`.
pub fn validate_id(kind: &'static str, id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::EmptyId { kind });
    }
    if id.chars().count() > ID_MAX_LEN {
        return Err(ValidationError::IdTooLong {
            kind,
            id: id.to_string(),
            max: ID_MAX_LEN,
        });
    }
    if let Some(ch) = id.chars().find(|c| !is_id_char(*c)) {
        return Err(ValidationError::InvalidCharacter {
            kind,
            id: id.to_string(),
            ch,
        });
    }
    Ok(())
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// Reject a sample that reports more conversions than visitors.
pub fn validate_counts(id: &str, conversions: u64, visitors: u64) -> Result<(), ValidationError> {
    if conversions > visitors {
        return Err(ValidationError::ConversionsExceedVisitors {
            id: id.to_string(),
            conversions,
            visitors,
        });
    }
    Ok(())
}
