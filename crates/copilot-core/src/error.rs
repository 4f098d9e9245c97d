use thiserror::Error;

/// Top-level error type for the copilot workspace.
///
/// Subsystem crates keep their own error enums for request-time failures and
/// convert into `CopilotError` only where construction can abort start-up.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CopilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<toml::de::Error> for CopilotError {
    fn from(err: toml::de::Error) -> Self {
        CopilotError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for CopilotError {
    fn from(err: toml::ser::Error) -> Self {
        CopilotError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for CopilotError {
    fn from(err: serde_json::Error) -> Self {
        CopilotError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for copilot operations.
pub type Result<T> = std::result::Result<T, CopilotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let cases: Vec<(CopilotError, &str)> = vec![
            (
                CopilotError::Config("bad key".to_string()),
                "Configuration error: bad key",
            ),
            (
                CopilotError::Storage("disk full".to_string()),
                "Storage error: disk full",
            ),
            (
                CopilotError::Provider("unreachable".to_string()),
                "Provider error: unreachable",
            ),
            (
                CopilotError::Serialization("invalid json".to_string()),
                "Serialization error: invalid json",
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CopilotError = io_err.into();
        assert!(matches!(err, CopilotError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_toml_error_maps_to_config() {
        let err: CopilotError = toml::from_str::<toml::Value>("= nope")
            .unwrap_err()
            .into();
        assert!(matches!(err, CopilotError::Config(_)));
    }

    #[test]
    fn test_json_error_maps_to_serialization() {
        let err: CopilotError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, CopilotError::Serialization(_)));
    }
}
