//! System instruction attached to every chat context

use crate::llm::SystemContent;

/// Base system prompt establishing the assistant's role
const BASE_PROMPT: &str = "You are a helpful, concise, and intelligent AI assistant. You use Markdown formatting to make your responses readable.";

/// Build the system instruction for a fresh chat context
pub fn build_system_prompt() -> Vec<SystemContent> {
    vec![SystemContent::new(BASE_PROMPT)]
}
