//! Chat runtime executor

use super::{ChatEvent, ChatSnapshot, Command};

use crate::conversation::{Conversation, Message};
use crate::session::{ChatSession, FragmentStream};
use crate::state_machine::{transition, ChatState, Effect, Event, TransitionError};
use futures::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// The exchange currently feeding the streaming message
struct InFlight {
    fragments: FragmentStream,
    cancel: CancellationToken,
}

/// Sole mutator of the conversation
pub struct ChatExecutor {
    state: ChatState,
    conversation: Conversation,
    session: ChatSession,
    command_rx: mpsc::Receiver<Command>,
    broadcast_tx: broadcast::Sender<ChatEvent>,
    exchange: Option<InFlight>,
}

impl ChatExecutor {
    pub(crate) fn new(
        session: ChatSession,
        command_rx: mpsc::Receiver<Command>,
        broadcast_tx: broadcast::Sender<ChatEvent>,
    ) -> Self {
        Self {
            state: ChatState::Idle,
            conversation: Conversation::new(),
            session,
            command_rx,
            broadcast_tx,
            exchange: None,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(model = %self.session.model_id(), "Starting chat runtime");

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                event = next_exchange_event(&mut self.exchange) => {
                    if let Err(e) = self.process_event(event) {
                        tracing::debug!(error = %e, "Dropped stale exchange event");
                    }
                }
            }
        }

        if let Some(inflight) = self.exchange.take() {
            inflight.cancel.cancel();
        }
        tracing::info!("Chat runtime stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Dispatch { event, reply } => {
                let result = self.process_event(event);
                if let Err(e) = &result {
                    tracing::debug!(error = %e, state = ?self.state, "Event rejected");
                }
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(ChatSnapshot {
                    messages: self.conversation.messages().to_vec(),
                    model_id: self.session.model_id().to_string(),
                    busy: self.state.is_busy(),
                });
            }
        }
    }

    fn process_event(&mut self, event: Event) -> Result<(), TransitionError> {
        // Pure state transition
        let result = transition(&self.state, &self.conversation, event)?;
        self.state = result.new_state;

        for effect in result.effects {
            self.execute_effect(effect);
        }
        Ok(())
    }

    fn execute_effect(&mut self, effect: Effect) {
        match effect {
            Effect::AppendUserMessage { id, text } => {
                let message = self.conversation.push(Message::user(id, text)).clone();
                self.broadcast(ChatEvent::MessageAdded { message });
            }

            Effect::AppendPlaceholder { id } => {
                let message = self.conversation.push(Message::placeholder(id)).clone();
                self.broadcast(ChatEvent::MessageAdded { message });
            }

            Effect::StartStream { text } => {
                let cancel = CancellationToken::new();
                let fragments = self.session.send_message_stream(&text, cancel.clone());
                self.exchange = Some(InFlight { fragments, cancel });
            }

            Effect::AppendFragment { target, text } => {
                let updated = self.conversation.append_fragment(target, &text).cloned();
                self.broadcast_update(updated);
            }

            Effect::FinishMessage { target } => {
                tracing::debug!(message = %target, "Reply finished");
                let updated = self.conversation.finish(target).cloned();
                self.broadcast_update(updated);
            }

            Effect::FailMessage { target } => {
                let updated = self.conversation.fail(target).cloned();
                self.broadcast_update(updated);
            }

            Effect::AbortStream => {
                if let Some(inflight) = self.exchange.take() {
                    inflight.cancel.cancel();
                    tracing::debug!(model = %self.session.model_id(), "Exchange aborted");
                }
            }

            Effect::SwitchModel { model_id } => {
                tracing::info!(from = %self.session.model_id(), to = %model_id, "Switching model");
                self.session.set_model(model_id);
                self.broadcast(ChatEvent::ModelChanged {
                    model_id: self.session.model_id().to_string(),
                });
            }

            Effect::RebuildContext => self.session.reset(),

            Effect::TruncateToSeed => {
                let dropped = self.conversation.len() - 1;
                self.conversation.truncate_to_seed();
                tracing::info!(dropped, "Conversation reset");
                self.broadcast(ChatEvent::ConversationReset {
                    messages: self.conversation.messages().to_vec(),
                });
            }

            Effect::NotifyBusy { busy } => self.broadcast(ChatEvent::BusyChanged { busy }),
        }
    }

    fn broadcast_update(&self, updated: Option<Message>) {
        match updated {
            Some(message) => self.broadcast(ChatEvent::MessageUpdated { message }),
            None => tracing::warn!("Effect targeted a message that is not streaming"),
        }
    }

    fn broadcast(&self, event: ChatEvent) {
        // No receivers is fine
        let _ = self.broadcast_tx.send(event);
    }
}

/// Next event from the in-flight exchange. Pends forever when there is
/// none, and clears the slot once the exchange ends.
async fn next_exchange_event(exchange: &mut Option<InFlight>) -> Event {
    let Some(inflight) = exchange.as_mut() else {
        return std::future::pending().await;
    };

    match inflight.fragments.next().await {
        Some(Ok(text)) => Event::Fragment { text },
        Some(Err(failure)) => {
            tracing::warn!(
                kind = failure.cause().kind.as_str(),
                error = %failure,
                "Exchange failed"
            );
            *exchange = None;
            Event::StreamFailed {
                message: failure.to_string(),
            }
        }
        None => {
            *exchange = None;
            Event::StreamCompleted
        }
    }
}
