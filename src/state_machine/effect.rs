//! Effects produced by state transitions

use crate::conversation::MessageId;

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Append the user's message
    AppendUserMessage { id: MessageId, text: String },

    /// Append an empty streaming model message
    AppendPlaceholder { id: MessageId },

    /// Open an exchange for the given text
    StartStream { text: String },

    /// Accumulate a fragment into the target message
    AppendFragment { target: MessageId, text: String },

    /// Mark the target message complete
    FinishMessage { target: MessageId },

    /// Replace the target message with the apology
    FailMessage { target: MessageId },

    /// Abort the in-flight exchange
    AbortStream,

    /// Target a different model with a fresh context
    SwitchModel { model_id: String },

    /// Rebuild the context for the current model
    RebuildContext,

    /// Drop every message after the seed greeting
    TruncateToSeed,

    /// Tell renderers the busy flag changed
    NotifyBusy { busy: bool },
}

impl Effect {
    pub fn busy() -> Self {
        Effect::NotifyBusy { busy: true }
    }

    pub fn idle() -> Self {
        Effect::NotifyBusy { busy: false }
    }
}
