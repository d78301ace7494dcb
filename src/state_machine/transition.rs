//! Pure state transition function
//!
//! Given the same state, conversation and event, a transition always
//! produces the same result. All I/O happens in the runtime that executes
//! the returned effects.

use super::{ChatState, Effect, Event};
use crate::conversation::Conversation;
use crate::llm::find_model;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ChatState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ChatState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Reasons an event is refused. A refused event changes nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Message is empty")]
    EmptyMessage,
    #[error("A reply is still streaming, wait for it to finish or cancel it")]
    Busy,
    #[error("No reply is streaming")]
    NothingToCancel,
    #[error("Unknown model: {0}")]
    UnknownModel(String),
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
pub fn transition(
    state: &ChatState,
    conversation: &Conversation,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (*state, event) {
        // ============================================================
        // User Message Handling
        // ============================================================
        (_, Event::UserMessage { text }) if text.trim().is_empty() => {
            Err(TransitionError::EmptyMessage)
        }

        (ChatState::Idle, Event::UserMessage { text }) => {
            let text = text.trim().to_string();
            let user_id = conversation.next_id();
            let target = user_id.next();

            Ok(TransitionResult::new(ChatState::Streaming { target })
                .with_effect(Effect::AppendUserMessage {
                    id: user_id,
                    text: text.clone(),
                })
                .with_effect(Effect::AppendPlaceholder { id: target })
                .with_effect(Effect::busy())
                .with_effect(Effect::StartStream { text }))
        }

        (ChatState::Streaming { .. }, Event::UserMessage { .. }) => Err(TransitionError::Busy),

        // ============================================================
        // Exchange Progress
        // ============================================================
        (ChatState::Streaming { target }, Event::Fragment { text }) => {
            let result = TransitionResult::new(ChatState::Streaming { target });
            if text.is_empty() {
                Ok(result)
            } else {
                Ok(result.with_effect(Effect::AppendFragment { target, text }))
            }
        }

        (ChatState::Streaming { target }, Event::StreamCompleted) => {
            Ok(TransitionResult::new(ChatState::Idle)
                .with_effect(Effect::FinishMessage { target })
                .with_effect(Effect::idle()))
        }

        // Partial text is discarded in favour of the apology
        (ChatState::Streaming { target }, Event::StreamFailed { .. }) => {
            Ok(TransitionResult::new(ChatState::Idle)
                .with_effect(Effect::FailMessage { target })
                .with_effect(Effect::idle()))
        }

        (
            ChatState::Idle,
            event @ (Event::Fragment { .. } | Event::StreamCompleted | Event::StreamFailed { .. }),
        ) => Err(TransitionError::InvalidTransition(format!(
            "{event:?} with no exchange in flight"
        ))),

        // ============================================================
        // Cancellation
        // ============================================================

        // Whatever arrived so far stays visible
        (ChatState::Streaming { target }, Event::Cancel) => {
            Ok(TransitionResult::new(ChatState::Idle)
                .with_effect(Effect::AbortStream)
                .with_effect(Effect::FinishMessage { target })
                .with_effect(Effect::idle()))
        }

        (ChatState::Idle, Event::Cancel) => Err(TransitionError::NothingToCancel),

        // ============================================================
        // Model Selection and Reset
        // ============================================================
        (ChatState::Idle, Event::SelectModel { model_id }) => {
            if find_model(&model_id).is_none() {
                return Err(TransitionError::UnknownModel(model_id));
            }
            Ok(TransitionResult::new(ChatState::Idle)
                .with_effect(Effect::SwitchModel { model_id }))
        }

        (ChatState::Idle, Event::Reset) => Ok(TransitionResult::new(ChatState::Idle)
            .with_effect(Effect::TruncateToSeed)
            .with_effect(Effect::RebuildContext)),

        (ChatState::Streaming { .. }, Event::SelectModel { .. } | Event::Reset) => {
            Err(TransitionError::Busy)
        }
    }
}
