//! Error types for EDH

use thiserror::Error;

/// Result type alias for EDH operations
pub type Result<T> = std::result::Result<T, EdhError>;

/// Main error type for EDH
#[derive(Error, Debug)]
pub enum EdhError {
    /// Missing or invalid job/step configuration. Skips the unit of work,
    /// never crashes the process.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Object store error: {0}")]
    Storage(String),

    #[error("Control table error: {0}")]
    ControlTable(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Lake write error: {0}")]
    Write(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EdhError {
    pub fn config(msg: impl Into<String>) -> Self {
        EdhError::Configuration(msg.into())
    }

    /// True when the error only invalidates the current job or step.
    pub fn is_configuration(&self) -> bool {
        matches!(self, EdhError::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_flagged() {
        assert!(EdhError::config("missing start_step").is_configuration());
        assert!(!EdhError::Storage("timeout".to_string()).is_configuration());
    }

    #[test]
    fn test_display() {
        let err = EdhError::config("global variable 'inbound' not found");
        assert_eq!(
            err.to_string(),
            "Configuration error: global variable 'inbound' not found"
        );
    }
}
