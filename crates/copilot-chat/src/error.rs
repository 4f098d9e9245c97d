//! Error types for the orchestration engine.

use std::time::Duration;

use copilot_core::error::CopilotError;

/// Failures talking to a model provider.
///
/// Fatal for the current turn; the driver turns them into a degraded
/// envelope with guidance text.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),
    #[error("AccessDeniedException: {0}")]
    Auth(String),
    #[error("ValidationException: model identifier is invalid: {0}")]
    ModelIdentity(String),
    #[error("ValidationException: {0}")]
    Validation(String),
    #[error("ThrottlingException: {0}")]
    Throttled(String),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl ProviderError {
    /// Request rejected as malformed or unsupported, including bad model ids.
    pub fn is_validation_class(&self) -> bool {
        matches!(self, ProviderError::Validation(_) | ProviderError::ModelIdentity(_))
    }

    pub fn is_model_identity(&self) -> bool {
        matches!(self, ProviderError::ModelIdentity(_))
    }
}

/// Errors rejecting a chat request before any model call.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("backend setup failed: {0}")]
    Setup(String),
}

impl From<CopilotError> for ChatError {
    fn from(err: CopilotError) -> Self {
        ChatError::Setup(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_class() {
        assert!(ProviderError::Validation("bad shape".into()).is_validation_class());
        assert!(ProviderError::ModelIdentity("x".into()).is_validation_class());
        assert!(ProviderError::ModelIdentity("x".into()).is_model_identity());
        assert!(!ProviderError::Validation("x".into()).is_model_identity());
        assert!(!ProviderError::Auth("denied".into()).is_validation_class());
        assert!(!ProviderError::Network("reset".into()).is_validation_class());
    }

    #[test]
    fn test_provider_error_display() {
        assert_eq!(
            ProviderError::Timeout(Duration::from_secs(60)).to_string(),
            "timed out after 60s"
        );
        assert_eq!(
            ProviderError::Api {
                status: 500,
                message: "boom".into()
            }
            .to_string(),
            "API error (500): boom"
        );
        assert!(ProviderError::ModelIdentity("foo".into())
            .to_string()
            .contains("model identifier is invalid"));
    }

    #[test]
    fn test_chat_error_display() {
        assert_eq!(ChatError::EmptyMessage.to_string(), "message cannot be empty");
        assert_eq!(
            ChatError::MessageTooLong(4000).to_string(),
            "message exceeds maximum length of 4000 characters"
        );
        let err: ChatError = CopilotError::Config("no key".into()).into();
        assert!(matches!(err, ChatError::Setup(_)));
    }
}
