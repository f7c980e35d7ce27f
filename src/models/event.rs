use std::sync::Arc;

use tokio::sync::mpsc;

use super::{ChatStatus, Message, PendingConfirmation};

/// Notifications for the presentation layer.
#[derive(Debug, Clone)]
pub enum Event {
    /// Refresh failed and credentials were cleared, the user must sign in again
    SessionExpired,

    StatusChanged(ChatStatus),
    /// Current value of the streaming accumulator
    StreamingContent(String),
    ConfirmationRequired(PendingConfirmation),
    MessageAppended(Message),
    ConversationDeleted(String),
    Error(String),
}

#[async_trait::async_trait]
pub trait EventTx {
    async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>>;
}

#[async_trait::async_trait]
impl EventTx for mpsc::Sender<Event> {
    async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>> {
        self.send(event).await
    }
}

#[async_trait::async_trait]
impl EventTx for mpsc::UnboundedSender<Event> {
    async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>> {
        self.send(event)
    }
}

pub type ArcEventTx = Arc<dyn EventTx + Send + Sync>;

/// Publishes to an optional observer. A closed channel only means nobody is
/// listening any more.
pub(crate) async fn publish(event_tx: Option<&ArcEventTx>, event: Event) {
    let Some(event_tx) = event_tx else {
        return;
    };
    if let Err(err) = event_tx.send(event).await {
        log::trace!("Event dropped, no receiver: {:?}", err.0);
    }
}
