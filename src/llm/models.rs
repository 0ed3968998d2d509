//! Judge model definitions

use super::anthropic::AnthropicModel;
use super::{AnthropicService, LlmService};
use std::sync::Arc;

/// Model definition with metadata
#[derive(Debug, Clone)]
pub struct ModelDef {
    /// User-facing model ID (e.g., "claude-4.5-haiku")
    pub id: &'static str,
    /// Human-readable description
    pub description: &'static str,
    /// Factory function to create the service
    pub factory: fn(&str, Option<&str>) -> Result<Arc<dyn LlmService>, String>,
}

fn anthropic(
    model: AnthropicModel,
    api_key: &str,
    gateway: Option<&str>,
) -> Result<Arc<dyn LlmService>, String> {
    // Accept any non-empty key (including "implicit" for gateway mode)
    if api_key.is_empty() {
        return Err(format!(
            "{} requires ANTHROPIC_API_KEY or gateway",
            model.model_id()
        ));
    }
    let service = AnthropicService::new(api_key.to_string(), model, gateway)
        .map_err(|e| e.message)?;
    Ok(Arc::new(service))
}

/// Get all available model definitions
pub fn all_models() -> &'static [ModelDef] {
    &[
        ModelDef {
            id: "claude-4.5-haiku",
            description: "Claude Haiku 4.5 (fast, cheap judge)",
            factory: |api_key, gateway| {
                anthropic(AnthropicModel::Claude45Haiku, api_key, gateway)
            },
        },
        ModelDef {
            id: "claude-4.5-sonnet",
            description: "Claude Sonnet 4.5 (stricter judge, slower)",
            factory: |api_key, gateway| {
                anthropic(AnthropicModel::Claude45Sonnet, api_key, gateway)
            },
        },
    ]
}
