//! Conversation data model
//!
//! An ordered, append-only list of messages seeded with a greeting. Only
//! the single streaming message is ever modified in place.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Greeting every conversation starts with, and returns to on reset
pub const GREETING: &str = "Hello! I'm Gemini. How can I help you today?";

/// Text shown in place of a reply whose exchange failed
pub const APOLOGY: &str = "I'm sorry, something went wrong. Please try again.";

/// Creation-ordered message identifier, unique for the whole session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct MessageId(u64);

impl MessageId {
    /// The identifier allocated right after this one
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// A message entry visible to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// More fragments are expected
    pub is_streaming: bool,
    /// The exchange behind this message failed
    pub is_error: bool,
}

impl Message {
    pub fn user(id: MessageId, text: impl Into<String>) -> Self {
        Self::new(id, Role::User, text.into(), false)
    }

    /// Empty model message awaiting fragments
    pub fn placeholder(id: MessageId) -> Self {
        Self::new(id, Role::Model, String::new(), true)
    }

    fn greeting(id: MessageId) -> Self {
        Self::new(id, Role::Model, GREETING.to_string(), false)
    }

    fn new(id: MessageId, role: Role, text: String, is_streaming: bool) -> Self {
        Self {
            id,
            role,
            text,
            timestamp: Utc::now(),
            is_streaming,
            is_error: false,
        }
    }
}

/// Ordered message list for one session
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<Message>,
    next_id: MessageId,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    /// A conversation holding only the seed greeting
    pub fn new() -> Self {
        let seed = MessageId(1);
        Self {
            messages: vec![Message::greeting(seed)],
            next_id: seed.next(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Identifier the next appended message will receive
    pub fn next_id(&self) -> MessageId {
        self.next_id
    }

    #[cfg(test)]
    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// The message currently receiving fragments, if any
    #[cfg(test)]
    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_streaming)
    }

    /// Append a message. Its id must not precede ids already handed out.
    pub fn push(&mut self, message: Message) -> &Message {
        debug_assert!(message.id >= self.next_id, "message ids must increase");
        self.next_id = message.id.next();
        let index = self.messages.len();
        self.messages.push(message);
        &self.messages[index]
    }

    /// Append a fragment to a streaming message
    pub fn append_fragment(&mut self, id: MessageId, fragment: &str) -> Option<&Message> {
        let message = self.streaming_mut(id)?;
        message.text.push_str(fragment);
        Some(message)
    }

    /// Mark a streaming message complete, keeping its text
    pub fn finish(&mut self, id: MessageId) -> Option<&Message> {
        let message = self.streaming_mut(id)?;
        message.is_streaming = false;
        Some(message)
    }

    /// Turn a streaming message into the error placeholder.
    ///
    /// Partial text is discarded; the message reads exactly [`APOLOGY`].
    pub fn fail(&mut self, id: MessageId) -> Option<&Message> {
        let message = self.streaming_mut(id)?;
        message.is_streaming = false;
        message.is_error = true;
        message.text = APOLOGY.to_string();
        Some(message)
    }

    /// Drop everything after the seed greeting. Ids are not reused.
    pub fn truncate_to_seed(&mut self) {
        self.messages.truncate(1);
    }

    fn streaming_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .rev()
            .find(|m| m.id == id)
            .filter(|m| m.is_streaming)
    }
}
