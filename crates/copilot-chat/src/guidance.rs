//! User-facing guidance for provider failures.

use copilot_core::ModelEnvelope;

use crate::backend::BackendInfo;
use crate::error::ProviderError;

/// Degraded envelope explaining a provider failure and how to fix it.
pub fn provider_failure_envelope(err: &ProviderError, info: &BackendInfo) -> ModelEnvelope {
    ModelEnvelope::degraded(guidance_text(err, info))
}

pub fn guidance_text(err: &ProviderError, info: &BackendInfo) -> String {
    match err {
        ProviderError::Auth(_) => format!(
            "Permission error: {err}\n\n\
             Your credentials need the bedrock:InvokeModel permission.\n\n\
             To fix:\n\
             1. Attach a policy granting bedrock:InvokeModel to your user or role\n\
             2. Or add this statement to your IAM policy:\n   \
             {{\"Effect\": \"Allow\", \"Action\": \"bedrock:InvokeModel\", \"Resource\": \"*\"}}"
        ),
        ProviderError::ModelIdentity(_) | ProviderError::Validation(_) => format!(
            "Model ID error: {err}\n\n\
             To fix:\n\
             1. Verify the model is available to your account\n\
             2. Check your model ID: {}\n\
             3. Ensure region matches: {}",
            info.model,
            info.region.as_deref().unwrap_or("n/a"),
        ),
        other => format!("{} error: {other}", provider_label(info.name)),
    }
}

fn provider_label(backend: &str) -> &'static str {
    match backend {
        "function_call" => "Ollama",
        "demo" => "Demo",
        _ => "Bedrock",
    }
}
