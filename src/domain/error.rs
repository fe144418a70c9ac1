//! Domain error types.

use chrono::{DateTime, Utc};

/// A single field failed a constructor-level check (asset profiles,
/// canonical bars).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Registry failures for asset profiles.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProfileError {
    #[error("{0} has a built-in profile and cannot be overridden")]
    BuiltIn(String),

    #[error("{0} is already registered")]
    AlreadyRegistered(String),

    #[error("{0} is not registered")]
    NotRegistered(String),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Top-level error type for pricevault.
#[derive(Debug, thiserror::Error)]
pub enum PriceVaultError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("duplicate record for {symbol} at {date}")]
    DuplicateRecord { symbol: String, date: DateTime<Utc> },

    #[error("record {id} not found")]
    RecordNotFound { id: i64 },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error("source error: {reason}")]
    Source { reason: String },

    #[error("no data for {symbol}")]
    NoData { symbol: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PriceVaultError {
    /// Storage-side failures, as opposed to rejected input.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            PriceVaultError::Database { .. }
                | PriceVaultError::DatabaseQuery { .. }
                | PriceVaultError::DuplicateRecord { .. }
                | PriceVaultError::RecordNotFound { .. }
        )
    }
}

impl From<&PriceVaultError> for std::process::ExitCode {
    fn from(err: &PriceVaultError) -> Self {
        let code: u8 = match err {
            PriceVaultError::Io(_) | PriceVaultError::Source { .. } => 1,
            PriceVaultError::ConfigParse { .. }
            | PriceVaultError::ConfigMissing { .. }
            | PriceVaultError::ConfigInvalid { .. } => 2,
            PriceVaultError::Database { .. }
            | PriceVaultError::DatabaseQuery { .. }
            | PriceVaultError::DuplicateRecord { .. }
            | PriceVaultError::RecordNotFound { .. } => 3,
            PriceVaultError::Validation(_) | PriceVaultError::Profile(_) => 4,
            PriceVaultError::NoData { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_kinds_are_distinct_from_validation() {
        let dup = PriceVaultError::DuplicateRecord {
            symbol: "0700.HK".into(),
            date: DateTime::<Utc>::MIN_UTC,
        };
        assert!(dup.is_storage());

        let invalid: PriceVaultError = ValidationError::new("high", "below low").into();
        assert!(!invalid.is_storage());
        assert_eq!(invalid.to_string(), "invalid high: below low");
    }

    #[test]
    fn profile_error_wraps_validation() {
        let err: ProfileError = ValidationError::new("multiplier", "must be positive").into();
        assert_eq!(err.to_string(), "invalid multiplier: must be positive");
    }
}
