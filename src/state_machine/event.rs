//! Events that can occur in a conversation

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // User events
    UserMessage { text: String },
    SelectModel { model_id: String },
    Reset,
    Cancel,

    // Exchange events
    Fragment { text: String },
    StreamCompleted,
    StreamFailed { message: String },
}
