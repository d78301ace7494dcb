//! Model catalog
//!
//! Every model the client can target, in the order they are offered.

use super::{GeminiService, LlmError, LlmService};
use std::sync::Arc;

/// Model targeted when nothing else is configured
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Model definition with metadata
#[derive(Debug, Clone)]
pub struct ModelDef {
    /// Model ID sent to the provider (e.g., "gemini-2.5-flash")
    pub id: &'static str,
    /// Human-readable name
    pub name: &'static str,
    /// Short description of what the model is good at
    pub description: &'static str,
    /// Factory function to create the service: `(api_key, model_id, gateway)`
    pub factory: fn(&str, &str, Option<&str>) -> Result<Arc<dyn LlmService>, LlmError>,
}

fn gemini_factory(
    api_key: &str,
    model_id: &str,
    gateway: Option<&str>,
) -> Result<Arc<dyn LlmService>, LlmError> {
    // Accept any non-empty key (including "implicit" for gateway mode)
    if api_key.is_empty() {
        return Err(LlmError::auth(format!(
            "{model_id} requires GEMINI_API_KEY or a gateway"
        )));
    }
    let service = GeminiService::new(api_key.to_string(), model_id, gateway)?;
    Ok(Arc::new(service))
}

static MODELS: &[ModelDef] = &[
    ModelDef {
        id: "gemini-2.5-flash",
        name: "Gemini 2.5 Flash",
        description: "Fast, efficient, low latency",
        factory: gemini_factory,
    },
    ModelDef {
        id: "gemini-3-pro-preview",
        name: "Gemini 3 Pro",
        description: "Reasoning, coding, complex tasks",
        factory: gemini_factory,
    },
];

/// Get all available model definitions
pub fn all_models() -> &'static [ModelDef] {
    MODELS
}

/// Look up a catalog entry by ID
pub fn find_model(id: &str) -> Option<&'static ModelDef> {
    MODELS.iter().find(|m| m.id == id)
}
