//! Streaming session adapter
//!
//! Bridges one user turn to the remote model and exposes the reply as a
//! lazy sequence of text fragments. Multi-turn memory lives in the
//! session's [`ChatContext`], which is replaced wholesale whenever the
//! model changes or the conversation is reset; it is never patched.

use crate::llm::{
    LlmError, LlmMessage, LlmRequest, LlmService, ModelRegistry, ProviderStream, StreamEvent,
    SystemContent,
};
use crate::system_prompt::build_system_prompt;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// The single failure kind of an exchange.
///
/// Network trouble, provider errors and a missing context all end up
/// here; the underlying classification is kept only for logging.
#[derive(Debug, Error)]
#[error("exchange failed: {0}")]
pub struct ExchangeFailure(#[from] LlmError);

impl ExchangeFailure {
    pub fn cause(&self) -> &LlmError {
        &self.0
    }
}

/// Lazy, single-consumer sequence of reply fragments.
///
/// Every `Ok` item is non-empty. An `Err` is always the last item.
pub type FragmentStream = BoxStream<'static, Result<String, ExchangeFailure>>;

/// Provider-side conversational memory, bound to one model
pub struct ChatContext {
    service: Arc<dyn LlmService>,
    system: Vec<SystemContent>,
    transcript: Arc<Mutex<Vec<LlmMessage>>>,
}

impl ChatContext {
    pub fn new(service: Arc<dyn LlmService>) -> Self {
        Self {
            service,
            system: build_system_prompt(),
            transcript: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn model_id(&self) -> &str {
        self.service.model_id()
    }

    fn open(&self, user_text: String, cancel: CancellationToken) -> FragmentStream {
        let exchange = Exchange {
            service: Arc::clone(&self.service),
            system: self.system.clone(),
            transcript: Arc::clone(&self.transcript),
            user_text,
            cancel,
        };
        stream::unfold(Phase::Opening(exchange), Phase::advance)
            .fuse()
            .boxed()
    }
}

/// Owns the current model selection and its chat context
pub struct ChatSession {
    registry: Arc<ModelRegistry>,
    model_id: String,
    context: Option<ChatContext>,
}

impl ChatSession {
    pub fn new(registry: Arc<ModelRegistry>, model_id: impl Into<String>) -> Self {
        let mut session = Self {
            registry,
            model_id: model_id.into(),
            context: None,
        };
        session.init_context();
        session
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Target a different model. Any existing context is discarded.
    pub fn set_model(&mut self, model_id: impl Into<String>) {
        self.model_id = model_id.into();
        self.init_context();
    }

    /// Start a fresh context for the current model
    pub fn reset(&mut self) {
        self.init_context();
    }

    fn init_context(&mut self) {
        self.context = self.registry.get(&self.model_id).map(ChatContext::new);
        match &self.context {
            Some(context) => {
                tracing::debug!(model = %context.model_id(), "Created chat context");
            }
            None => {
                tracing::warn!(model = %self.model_id, "No service available for model");
            }
        }
    }

    /// Send one user turn and stream the reply.
    ///
    /// The turn is committed to the context only if the reply completes
    /// with some text. Cancelling `cancel` ends the sequence early
    /// without an error and without committing.
    ///
    /// Callers must drain one sequence before starting the next; two
    /// overlapping exchanges would race on the same context.
    pub fn send_message_stream(&mut self, text: &str, cancel: CancellationToken) -> FragmentStream {
        if text.trim().is_empty() {
            return failed(LlmError::invalid_request("Message text is empty"));
        }

        if self.context.is_none() {
            self.init_context();
        }

        match &self.context {
            Some(context) => context.open(text.to_string(), cancel),
            None => failed(LlmError::invalid_request(format!(
                "Model {} is not available",
                self.model_id
            ))),
        }
    }
}

fn failed(error: LlmError) -> FragmentStream {
    stream::once(async move { Err(ExchangeFailure::from(error)) }).boxed()
}

/// Everything one exchange needs, detached from the session borrow
struct Exchange {
    service: Arc<dyn LlmService>,
    system: Vec<SystemContent>,
    transcript: Arc<Mutex<Vec<LlmMessage>>>,
    user_text: String,
    cancel: CancellationToken,
}

impl Exchange {
    async fn request(&self) -> LlmRequest {
        let mut messages = self.transcript.lock().await.clone();
        messages.push(LlmMessage::user(self.user_text.clone()));
        LlmRequest {
            system: self.system.clone(),
            messages,
        }
    }

    async fn commit(self, reply: String) {
        if reply.is_empty() {
            tracing::debug!("Reply was empty, turn not recorded");
            return;
        }
        let mut transcript = self.transcript.lock().await;
        transcript.push(LlmMessage::user(self.user_text));
        transcript.push(LlmMessage::model(reply));
    }
}

enum Phase {
    Opening(Exchange),
    Streaming {
        exchange: Exchange,
        events: ProviderStream,
        reply: String,
    },
    Done,
}

impl Phase {
    async fn advance(self) -> Option<(Result<String, ExchangeFailure>, Phase)> {
        let mut phase = self;
        loop {
            phase = match phase {
                Phase::Done => return None,

                Phase::Opening(exchange) => {
                    let request = exchange.request().await;
                    let opened = tokio::select! {
                        result = exchange.service.stream(&request) => result,
                        () = exchange.cancel.cancelled() => return None,
                    };
                    match opened {
                        Ok(events) => Phase::Streaming {
                            exchange,
                            events,
                            reply: String::new(),
                        },
                        Err(e) => return Some((Err(e.into()), Phase::Done)),
                    }
                }

                Phase::Streaming {
                    exchange,
                    mut events,
                    mut reply,
                } => {
                    let next = tokio::select! {
                        next = events.next() => next,
                        () = exchange.cancel.cancelled() => {
                            tracing::debug!(received = reply.len(), "Exchange cancelled");
                            return None;
                        }
                    };
                    match next {
                        Some(Ok(StreamEvent::Text(text))) if !text.is_empty() => {
                            reply.push_str(&text);
                            return Some((
                                Ok(text),
                                Phase::Streaming {
                                    exchange,
                                    events,
                                    reply,
                                },
                            ));
                        }
                        Some(Ok(_)) => Phase::Streaming {
                            exchange,
                            events,
                            reply,
                        },
                        Some(Err(e)) => return Some((Err(e.into()), Phase::Done)),
                        None => {
                            exchange.commit(reply).await;
                            return None;
                        }
                    }
                }
            };
        }
    }
}
