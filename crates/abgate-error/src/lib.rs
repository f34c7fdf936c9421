//! Unified error types for abgate.
//!
//! Library crates return these; the CLI wraps them in `anyhow` with context.

use std::path::PathBuf;

/// Problems with a caller-supplied identifier or count.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{kind} id must not be empty")]
    EmptyId { kind: &'static str },

    #[error("{kind} id {id:?} is longer than {max} characters")]
    IdTooLong {
        kind: &'static str,
        id: String,
        max: usize,
    },

    #[error("{kind} id {id:?} contains invalid character {ch:?} (allowed: a-z, A-Z, 0-9, '_', '-', '.')")]
    InvalidCharacter {
        kind: &'static str,
        id: String,
        ch: char,
    },

    #[error("variant {id:?} reports {conversions} conversions for {visitors} visitors")]
    ConversionsExceedVisitors {
        id: String,
        conversions: u64,
        visitors: u64,
    },
}

/// Problems with configuration values, regardless of where they came from.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("confidence level must be within (0, 100), got {0}")]
    ConfidenceLevel(f64),

    #[error("{name} must be within [0, 100], got {value}")]
    ThresholdRange { name: &'static str, value: f64 },

    #[error("medium significance threshold ({medium}) must not exceed high threshold ({high})")]
    ThresholdOrder { medium: f64, high: f64 },
}

#[derive(Debug, thiserror::Error)]
pub enum AbgateError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {path}: {source}")]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl AbgateError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AbgateError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = AbgateError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_converts_into_unified_error() {
        let err: AbgateError = ValidationError::EmptyId { kind: "variant" }.into();
        assert_eq!(err.to_string(), "variant id must not be empty");
    }

    #[test]
    fn io_error_mentions_path() {
        let err = AbgateError::io(
            "abgate.toml",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("abgate.toml"), "{msg}");
        assert!(msg.contains("denied"), "{msg}");
    }

    #[test]
    fn toml_parse_error_mentions_path() {
        let source = toml::from_str::<toml::Table>("key = ").unwrap_err();
        let err = AbgateError::TomlParse {
            path: "abgate.toml".into(),
            source,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("invalid TOML in abgate.toml:"), "{msg}");
    }

    #[test]
    fn threshold_order_message_names_both_values() {
        let err = ConfigError::ThresholdOrder {
            medium: 97.0,
            high: 95.0,
        };
        assert_eq!(
            err.to_string(),
            "medium significance threshold (97) must not exceed high threshold (95)"
        );
    }
}
