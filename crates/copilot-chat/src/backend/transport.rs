//! HTTP transport for provider calls.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use copilot_core::error::CopilotError;

use crate::error::ProviderError;

/// Posts a JSON body and returns the decoded JSON response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, ProviderError>;
}

pub struct HttpTransport {
    client: Client,
    bearer: Option<String>,
}

impl HttpTransport {
    pub fn new(timeout: Duration, bearer: Option<String>) -> Result<Self, CopilotError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CopilotError::Provider(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, bearer })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, ProviderError> {
        let mut request = self
            .client
            .post(url)
            .header(header::ACCEPT, "application/json")
            .json(body);
        if let Some(token) = &self.bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Network(format!("request timed out: {e}"))
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        let error_type = response
            .headers()
            .get("x-amzn-ErrorType")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        debug!(url, status = status.as_u16(), bytes = text.len(), "Provider response");

        if !status.is_success() {
            return Err(error_from_status(status, error_type.as_deref(), &text));
        }
        Ok(decode_body(&text))
    }
}

/// Map a failed HTTP exchange onto a provider error class.
pub fn error_from_status(status: StatusCode, error_type: Option<&str>, body: &str) -> ProviderError {
    let message = error_message(body);
    let lowered = message.to_lowercase();
    if lowered.contains("model identifier is invalid") || lowered.contains("invalid model") {
        return ProviderError::ModelIdentity(message);
    }
    let error_type = error_type.unwrap_or_default();
    if error_type.starts_with("AccessDenied") || error_type.starts_with("UnrecognizedClient") {
        return ProviderError::Auth(message);
    }
    if error_type.starts_with("Throttling") {
        return ProviderError::Throttled(message);
    }
    if error_type.starts_with("Validation") {
        return ProviderError::Validation(message);
    }
    match status.as_u16() {
        401 | 403 => ProviderError::Auth(message),
        404 => ProviderError::ModelIdentity(message),
        429 => ProviderError::Throttled(message),
        400 | 422 => ProviderError::Validation(message),
        code => ProviderError::Api {
            status: code,
            message,
        },
    }
}

/// The `message` (or `error`) field of an error body, else the raw body.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => ["message", "Message", "error"]
            .iter()
            .find_map(|key| match value.get(key) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Object(inner)) => inner
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            })
            .unwrap_or_else(|| body.trim().to_string()),
        Err(_) => body.trim().to_string(),
    }
}

/// Decode a response body: the whole text as JSON, else its first line
/// (newline-delimited streams), else the text as a JSON string.
pub fn decode_body(text: &str) -> Value {
    if let Ok(value) = serde_json::from_str(text) {
        return value;
    }
    if let Some(first) = text.lines().find(|l| !l.trim().is_empty()) {
        if let Ok(value) = serde_json::from_str(first) {
            return value;
        }
    }
    Value::String(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            error_from_status(StatusCode::FORBIDDEN, None, r#"{"message":"denied"}"#),
            ProviderError::Auth(m) if m == "denied"
        ));
        assert!(matches!(
            error_from_status(StatusCode::TOO_MANY_REQUESTS, None, "slow down"),
            ProviderError::Throttled(_)
        ));
        assert!(matches!(
            error_from_status(StatusCode::BAD_REQUEST, None, r#"{"message":"tools not supported"}"#),
            ProviderError::Validation(_)
        ));
        assert!(matches!(
            error_from_status(StatusCode::NOT_FOUND, None, "no such model"),
            ProviderError::ModelIdentity(_)
        ));
        assert!(matches!(
            error_from_status(StatusCode::BAD_GATEWAY, None, "upstream"),
            ProviderError::Api { status: 502, .. }
        ));
    }

    #[test]
    fn test_model_identity_wins_over_status() {
        let err = error_from_status(
            StatusCode::BAD_REQUEST,
            Some("ValidationException"),
            r#"{"message":"The provided model identifier is invalid."}"#,
        );
        assert!(err.is_model_identity());
    }

    #[test]
    fn test_error_type_header() {
        let err = error_from_status(StatusCode::BAD_REQUEST, Some("AccessDeniedException"), "{}");
        assert!(matches!(err, ProviderError::Auth(_)));
        let err = error_from_status(StatusCode::BAD_REQUEST, Some("ThrottlingException:x"), "{}");
        assert!(matches!(err, ProviderError::Throttled(_)));
    }

    #[test]
    fn test_decode_body() {
        assert_eq!(decode_body(r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(decode_body("{\"a\":1}\n{\"a\":2}\n"), json!({"a": 1}));
        assert_eq!(decode_body("plain text"), json!("plain text"));
    }

    #[test]
    fn test_http_transport_builds() {
        assert!(HttpTransport::new(Duration::from_secs(5), Some("token".into())).is_ok());
    }
}
