//! Conversation state types

use crate::conversation::MessageId;

/// Exchange state of the conversation.
///
/// `Streaming` is the busy flag: while it holds, no other exchange, model
/// switch or reset is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatState {
    /// Ready for user input
    #[default]
    Idle,

    /// A reply is being streamed into `target`
    Streaming { target: MessageId },
}

impl ChatState {
    pub fn is_busy(&self) -> bool {
        matches!(self, ChatState::Streaming { .. })
    }
}
