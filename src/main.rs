//! Gemini Flow - streaming chat with Gemini models
//!
//! A terminal front end over the chat runtime. It reads lines from stdin
//! and renders the conversation as replies stream in.

mod conversation;
mod llm;
mod runtime;
mod session;
mod state_machine;
mod system_prompt;

use conversation::Role;
use llm::{all_models, find_model, LlmConfig, ModelRegistry};
use runtime::{ChatError, ChatEvent, ChatHandle, ChatRuntime};
use session::ChatSession;
use state_machine::TransitionError;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so they don't interleave with the chat
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gemini_flow=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let llm_config = LlmConfig::from_env();
    let llm_registry = Arc::new(ModelRegistry::new(&llm_config));

    if llm_registry.has_models() {
        let models: Vec<_> = llm_registry.available_models().iter().map(|m| m.id).collect();
        tracing::info!(
            models = ?models,
            default = %llm_registry.default_model_id(),
            "LLM registry initialized"
        );
    } else {
        tracing::warn!("No Gemini API key configured. Set GEMINI_API_KEY, API_KEY or LLM_GATEWAY.");
    }

    let session = ChatSession::new(
        Arc::clone(&llm_registry),
        llm_registry.default_model_id().to_string(),
    );
    let chat = ChatRuntime::spawn(session);
    let renderer = tokio::spawn(render(chat.subscribe()));

    let snapshot = chat.snapshot().await?;
    for message in &snapshot.messages {
        println!("gemini> {}", message.text);
    }
    println!(
        "(using {}; /models, /model <id>, /reset, /cancel, /quit)",
        display_name(&snapshot.model_id)
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match Input::parse(&line) {
            Input::Quit => break,
            Input::Models => list_models(&chat, &llm_registry).await?,
            Input::Model(id) => report(chat.select_model(id).await),
            Input::Reset => report(chat.reset().await),
            Input::Cancel => report(chat.cancel().await),
            Input::Send(text) => report(chat.send_message(text).await),
        }
    }

    drop(chat);
    renderer.abort();
    Ok(())
}

/// One line of user input
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Models,
    Model(&'a str),
    Reset,
    Cancel,
    Quit,
    Send(&'a str),
}

impl<'a> Input<'a> {
    fn parse(line: &'a str) -> Self {
        let trimmed = line.trim();
        match trimmed.split_once(char::is_whitespace) {
            Some(("/model", id)) => Input::Model(id.trim()),
            _ => match trimmed {
                "/models" | "/model" => Input::Models,
                "/reset" | "/clear" => Input::Reset,
                "/cancel" => Input::Cancel,
                "/quit" | "/exit" => Input::Quit,
                _ => Input::Send(line),
            },
        }
    }
}

fn report(result: Result<(), ChatError>) {
    match result {
        Ok(()) | Err(ChatError::Rejected(TransitionError::EmptyMessage)) => {}
        Err(e) => println!("({e})"),
    }
}

fn display_name(model_id: &str) -> &str {
    find_model(model_id).map_or(model_id, |def| def.name)
}

async fn list_models(chat: &ChatHandle, registry: &ModelRegistry) -> Result<(), ChatError> {
    let current = chat.snapshot().await?.model_id;
    let available = registry.available_models();
    for def in all_models() {
        let marker = if def.id == current { '*' } else { ' ' };
        let note = if available.iter().any(|m| m.id == def.id) {
            ""
        } else {
            " (unavailable)"
        };
        println!("{marker} {:<22} {} - {}{note}", def.id, def.name, def.description);
    }
    Ok(())
}

/// Print the conversation as it changes
async fn render(mut events: broadcast::Receiver<ChatEvent>) {
    // Bytes of the streaming message already on screen
    let mut printed = 0usize;

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Updates carry the full text, so the next one catches up
                tracing::debug!(skipped, "Renderer lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            ChatEvent::MessageAdded { message } => {
                if message.role == Role::Model {
                    print!("gemini> ");
                    printed = 0;
                }
            }
            ChatEvent::MessageUpdated { message } => {
                if message.is_error {
                    if printed > 0 {
                        println!();
                    }
                    println!("{}", message.text);
                    printed = 0;
                } else {
                    print!("{}", message.text.get(printed..).unwrap_or_default());
                    printed = message.text.len();
                    if !message.is_streaming {
                        println!();
                        printed = 0;
                    }
                }
            }
            ChatEvent::ConversationReset { messages } => {
                println!("(conversation cleared)");
                for message in messages {
                    println!("gemini> {}", message.text);
                }
            }
            ChatEvent::ModelChanged { model_id } => {
                println!("(now using {})", display_name(&model_id));
            }
            ChatEvent::BusyChanged { .. } => {}
        }
        let _ = std::io::stdout().flush();
    }
}
