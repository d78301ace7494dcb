//! LLM provider abstraction
//!
//! Provides a common streaming interface over the remote model provider.

mod error;
mod gemini;
mod models;
mod registry;
mod types;


pub use error::{LlmError, LlmErrorKind};
pub use gemini::GeminiService;
pub use models::{all_models, find_model, ModelDef, DEFAULT_MODEL};
pub use registry::{LlmConfig, ModelRegistry};
pub use types::*;

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;

/// Common interface for LLM providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Open a streamed exchange.
    ///
    /// Resolves once the provider has accepted the request; the reply
    /// then arrives through the returned stream.
    async fn stream(&self, request: &LlmRequest) -> Result<ProviderStream, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

/// Logging wrapper for LLM services
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn stream(&self, request: &LlmRequest) -> Result<ProviderStream, LlmError> {
        let start = Instant::now();
        let result = self.inner.stream(request).await;

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %start.elapsed().as_millis(),
                    kind = e.kind.as_str(),
                    error = %e.message,
                    "LLM request failed"
                );
                return Err(e);
            }
        };

        tracing::debug!(
            model = %self.model_id,
            duration_ms = %start.elapsed().as_millis(),
            turns = request.messages.len(),
            "LLM stream opened"
        );

        let model_id = self.model_id.clone();
        let mut fragments = 0usize;
        Ok(stream
            .inspect(move |item| match item {
                Ok(StreamEvent::Text(_)) => fragments += 1,
                Ok(StreamEvent::Finished {
                    finish_reason,
                    usage,
                }) => {
                    tracing::info!(
                        model = %model_id,
                        duration_ms = %start.elapsed().as_millis(),
                        fragments,
                        finish_reason = finish_reason.as_deref().unwrap_or("unknown"),
                        input_tokens = usage.input_tokens,
                        output_tokens = usage.output_tokens,
                        "LLM stream completed"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        model = %model_id,
                        duration_ms = %start.elapsed().as_millis(),
                        fragments,
                        kind = e.kind.as_str(),
                        error = %e.message,
                        "LLM stream failed"
                    );
                }
            })
            .boxed())
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
