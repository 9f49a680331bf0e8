//! Configuration errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration value `{field}`")]
    Missing { field: String },

    #[error("invalid configuration value `{field}`: {reason}")]
    Invalid { field: String, reason: String },

    #[error("failed to read configuration file {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

impl ConfigError {
    pub fn missing(field: impl Into<String>) -> Self {
        Self::Missing { field: field.into() }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
