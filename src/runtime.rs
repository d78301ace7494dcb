//! Runtime for executing the chat
//!
//! A single task owns the conversation, the session and the in-flight
//! exchange. Everything else talks to it through a [`ChatHandle`] and
//! observes it through broadcast [`ChatEvent`]s.

mod executor;


use executor::ChatExecutor;

use crate::conversation::Message;
use crate::session::ChatSession;
use crate::state_machine::{Event, TransitionError};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Events sent to renderers
#[derive(Debug, Clone)]
pub enum ChatEvent {
    MessageAdded {
        message: Message,
    },
    /// Carries the full message, not just the newest fragment
    MessageUpdated {
        message: Message,
    },
    ConversationReset {
        messages: Vec<Message>,
    },
    ModelChanged {
        model_id: String,
    },
    BusyChanged {
        busy: bool,
    },
}

/// Point-in-time view of the chat
#[derive(Debug, Clone)]
pub struct ChatSnapshot {
    pub messages: Vec<Message>,
    pub model_id: String,
    #[allow(dead_code)] // API completeness
    pub busy: bool,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Rejected(#[from] TransitionError),
    #[error("Chat runtime has stopped")]
    Closed,
}

pub(crate) enum Command {
    Dispatch {
        event: Event,
        reply: oneshot::Sender<Result<(), TransitionError>>,
    },
    Snapshot {
        reply: oneshot::Sender<ChatSnapshot>,
    },
}

/// Starts chat runtimes
pub struct ChatRuntime;

impl ChatRuntime {
    /// Spawn the runtime task for `session`.
    ///
    /// The task stops once every handle is dropped.
    pub fn spawn(session: ChatSession) -> ChatHandle {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (broadcast_tx, _) = broadcast::channel(1024);

        let executor = ChatExecutor::new(session, command_rx, broadcast_tx.clone());
        tokio::spawn(executor.run());

        ChatHandle {
            command_tx,
            broadcast_tx,
        }
    }
}

/// Handle to interact with a running chat
#[derive(Clone)]
pub struct ChatHandle {
    command_tx: mpsc::Sender<Command>,
    broadcast_tx: broadcast::Sender<ChatEvent>,
}

impl ChatHandle {
    /// Submit user text. Resolves once the submission is accepted or
    /// rejected; the reply arrives through [`Self::subscribe`].
    pub async fn send_message(&self, text: impl Into<String>) -> Result<(), ChatError> {
        self.dispatch(Event::UserMessage { text: text.into() })
            .await
    }

    /// Switch to another model. Messages stay; model memory does not.
    pub async fn select_model(&self, model_id: impl Into<String>) -> Result<(), ChatError> {
        self.dispatch(Event::SelectModel {
            model_id: model_id.into(),
        })
        .await
    }

    /// Clear the conversation back to the greeting
    pub async fn reset(&self) -> Result<(), ChatError> {
        self.dispatch(Event::Reset).await
    }

    /// Stop the reply being streamed
    pub async fn cancel(&self) -> Result<(), ChatError> {
        self.dispatch(Event::Cancel).await
    }

    pub async fn snapshot(&self) -> Result<ChatSnapshot, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| ChatError::Closed)?;
        rx.await.map_err(|_| ChatError::Closed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.broadcast_tx.subscribe()
    }

    async fn dispatch(&self, event: Event) -> Result<(), ChatError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Dispatch { event, reply })
            .await
            .map_err(|_| ChatError::Closed)?;
        rx.await.map_err(|_| ChatError::Closed)??;
        Ok(())
    }
}
