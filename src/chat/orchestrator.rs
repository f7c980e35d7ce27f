#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod tests;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    models::{
        ArcEventTx, ChatStatus, Completion, Conversation, ConversationMode, ConversationSummary,
        Event, Message, PendingConfirmation, StreamFrame, event::publish,
    },
    session::ApiError,
    stream::{ArcMessageStreamer, StreamEnd},
};

use super::{ArcChatApi, ChatError};

/// Cancels the stream currently owned by an [`Orchestrator`]. Cloneable so
/// it can be handed to whatever watches for user interrupts.
#[derive(Clone, Default)]
pub struct AbortHandle {
    token: Arc<Mutex<CancellationToken>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.token.lock().cancel();
    }

    /// Starts a new stream scope, cancelling the previous one.
    fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let prior = std::mem::replace(&mut *self.token.lock(), token.clone());
        prior.cancel();
        token
    }
}

/// State of one `send_message` call.
struct Turn {
    conversation_id: String,
    temp_id: String,
    finalized: bool,
}

/// Conversation state machine: `Idle -> Sending -> (Streaming | Gated) -> Idle`.
///
/// Holds the cached conversation list, the loaded conversation, the
/// streaming accumulator and the confirmation gate. Failures are returned to
/// the caller and also kept in [`Orchestrator::error`] until cleared.
pub struct Orchestrator {
    api: ArcChatApi,
    streamer: ArcMessageStreamer,
    event_tx: Option<ArcEventTx>,

    conversations: Vec<ConversationSummary>,
    current: Option<Conversation>,

    status: ChatStatus,
    streaming_content: String,
    pending_confirmation: Option<PendingConfirmation>,
    error: Option<ChatError>,
    is_loading: bool,
    is_confirming: bool,

    abort: AbortHandle,
}

impl Orchestrator {
    pub fn new(api: ArcChatApi, streamer: ArcMessageStreamer) -> Self {
        Self {
            api,
            streamer,
            event_tx: None,
            conversations: vec![],
            current: None,
            status: ChatStatus::Idle,
            streaming_content: String::new(),
            pending_confirmation: None,
            error: None,
            is_loading: false,
            is_confirming: false,
            abort: AbortHandle::default(),
        }
    }

    pub fn with_event_tx(mut self, event_tx: ArcEventTx) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.conversations
    }

    pub fn current_conversation(&self) -> Option<&Conversation> {
        self.current.as_ref()
    }

    pub fn status(&self) -> ChatStatus {
        self.status
    }

    pub fn is_streaming(&self) -> bool {
        self.status == ChatStatus::Streaming
    }

    pub fn streaming_content(&self) -> &str {
        &self.streaming_content
    }

    pub fn pending_confirmation(&self) -> Option<&PendingConfirmation> {
        self.pending_confirmation.as_ref()
    }

    pub fn error(&self) -> Option<&ChatError> {
        self.error.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn is_confirming(&self) -> bool {
        self.is_confirming
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn set_current_conversation(&mut self, conversation: Option<Conversation>) {
        self.current = conversation;
    }

    pub async fn load_conversations(
        &mut self,
        mode: Option<ConversationMode>,
    ) -> Result<(), ChatError> {
        self.begin_loading();
        let result = self.api.list_conversations(mode).await;
        self.is_loading = false;

        self.conversations = self.settle(result).await?;
        Ok(())
    }

    pub async fn load_conversation(&mut self, id: &str) -> Result<(), ChatError> {
        self.begin_loading();
        let result = self.api.get_conversation(id.to_string()).await;
        self.is_loading = false;

        self.current = Some(self.settle(result).await?);
        Ok(())
    }

    /// Creates a conversation and puts it first in the cached list.
    pub async fn create_conversation(
        &mut self,
        mode: ConversationMode,
        title: Option<&str>,
    ) -> Result<ConversationSummary, ChatError> {
        self.begin_loading();
        let result = self
            .api
            .create_conversation(mode, title.map(str::to_string))
            .await;
        self.is_loading = false;

        let summary = self.settle(result).await?;
        log::debug!("Created {} conversation {}", summary.mode, summary.id);
        self.conversations.insert(0, summary.clone());
        Ok(summary)
    }

    pub async fn delete_conversation(&mut self, id: &str) -> Result<(), ChatError> {
        let result = self.api.delete_conversation(id.to_string()).await;
        self.settle(result).await?;

        self.conversations.retain(|c| c.id != id);
        if self.current.as_ref().is_some_and(|c| c.id() == id) {
            self.current = None;
        }
        publish(self.event_tx.as_ref(), Event::ConversationDeleted(id.to_string())).await;
        Ok(())
    }

    /// Deletes the loaded conversation when it has no messages, so abandoned
    /// placeholders do not pile up.
    pub async fn cleanup_empty_conversations(&mut self) -> Result<(), ChatError> {
        let Some(id) = self
            .current
            .as_ref()
            .filter(|c| c.is_empty())
            .map(|c| c.id().to_string())
        else {
            return Ok(());
        };

        log::debug!("Removing empty conversation {}", id);
        if let Err(err) = self.api.delete_conversation(id.clone()).await {
            log::error!("Failed to clean up empty conversation {}: {}", id, err);
            return Err(err.into());
        }

        self.conversations.retain(|c| c.id != id);
        self.current = None;
        publish(self.event_tx.as_ref(), Event::ConversationDeleted(id)).await;
        Ok(())
    }

    /// Sends `content` and streams the reply into the loaded conversation.
    ///
    /// The user message is appended before any network call and is kept
    /// even when the reply fails. Returns once the stream reached a terminal
    /// frame, opened the confirmation gate, failed or was aborted.
    pub async fn send_message(
        &mut self,
        conversation_id: &str,
        content: &str,
    ) -> Result<(), ChatError> {
        let mut turn = self.start_turn(conversation_id, content).await?;

        let cancel = self.abort.begin();
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
        let streamer = Arc::clone(&self.streamer);
        let stream = streamer.stream_message(
            conversation_id.to_string(),
            content.to_string(),
            frame_tx,
            cancel,
        );
        tokio::pin!(stream);
        self.set_status(ChatStatus::Streaming).await;

        let mut outcome = None;
        loop {
            tokio::select! {
                biased;
                Some(frame) = frame_rx.recv() => self.apply_frame(&mut turn, frame).await,
                result = &mut stream, if outcome.is_none() => outcome = Some(result),
                else => break,
            }
        }

        match outcome {
            Some(Ok(StreamEnd::Terminal)) | Some(Ok(StreamEnd::Gated)) => {}
            Some(Ok(StreamEnd::DoneMarker)) => {
                if !turn.finalized && !self.streaming_content.is_empty() {
                    let message = Message::new_assistant(&turn.conversation_id, "");
                    let completion = Completion {
                        message,
                        user_message: None,
                    };
                    self.finalize(&mut turn, completion).await;
                } else {
                    self.set_status(ChatStatus::Idle).await;
                }
            }
            Some(Ok(StreamEnd::Cancelled)) | None => {
                log::debug!("Stream for {} was aborted", turn.conversation_id);
                self.streaming_content.clear();
                self.set_status(ChatStatus::Idle).await;
            }
            Some(Err(err)) => {
                self.streaming_content.clear();
                self.set_error(err.into()).await;
                self.set_status(ChatStatus::Idle).await;
            }
        }

        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Non streaming variant of [`Orchestrator::send_message`]. The server
    /// answers with both persisted messages at once.
    pub async fn send_message_direct(
        &mut self,
        conversation_id: &str,
        content: &str,
    ) -> Result<(), ChatError> {
        let turn = self.start_turn(conversation_id, content).await?;

        let result = self
            .api
            .send_message(conversation_id.to_string(), content.to_string())
            .await;
        let exchange = match self.settle(result).await {
            Ok(exchange) => exchange,
            Err(err) => {
                self.set_status(ChatStatus::Idle).await;
                return Err(err);
            }
        };

        if let Some(current) = self
            .current
            .as_mut()
            .filter(|c| c.id() == turn.conversation_id)
        {
            current.replace_message(&turn.temp_id, exchange.user_message);
            current.append_message(exchange.assistant_message.clone());
        }
        publish(
            self.event_tx.as_ref(),
            Event::MessageAppended(exchange.assistant_message),
        )
        .await;
        self.set_status(ChatStatus::Idle).await;
        Ok(())
    }

    /// Runs the gated action. On failure the gate stays open so the caller
    /// can retry or cancel.
    pub async fn confirm_execution(&mut self) -> Result<(), ChatError> {
        let Some(pending) = self.pending_confirmation.clone() else {
            return Err(ChatError::NotGated);
        };

        self.is_confirming = true;
        let result = self.api.confirm_execution(pending.payload()).await;
        self.is_confirming = false;

        let result = match result {
            Ok(result) => result,
            Err(err) => {
                log::error!("Confirming {} failed: {}", pending.tool_name, err);
                let err = ChatError::from(err);
                self.set_error(err.clone()).await;
                return Err(err);
            }
        };

        let message = Message::new_assistant(&pending.conversation_id, result.describe());
        if let Some(current) = self
            .current
            .as_mut()
            .filter(|c| c.id() == pending.conversation_id)
        {
            current.append_message(message.clone());
        }
        self.pending_confirmation = None;
        self.streaming_content.clear();
        publish(self.event_tx.as_ref(), Event::MessageAppended(message)).await;
        self.set_status(ChatStatus::Idle).await;
        Ok(())
    }

    /// Declines the gated action locally. The backend is not contacted.
    pub async fn cancel_confirmation(&mut self) {
        if self.pending_confirmation.take().is_none() {
            return;
        }
        self.streaming_content.clear();
        self.set_status(ChatStatus::Idle).await;
    }

    async fn start_turn(&mut self, conversation_id: &str, content: &str) -> Result<Turn, ChatError> {
        if self.pending_confirmation.is_some() {
            return Err(ChatError::ConfirmationPending);
        }

        let Some(current) = self
            .current
            .as_mut()
            .filter(|c| c.id() == conversation_id)
        else {
            let err = ChatError::NoConversationSelected;
            self.set_error(err.clone()).await;
            return Err(err);
        };

        let message = Message::optimistic_user(conversation_id, content);
        let temp_id = message.id.clone();
        current.append_message(message.clone());

        self.error = None;
        self.streaming_content.clear();
        publish(self.event_tx.as_ref(), Event::MessageAppended(message)).await;
        self.set_status(ChatStatus::Sending).await;

        Ok(Turn {
            conversation_id: conversation_id.to_string(),
            temp_id,
            finalized: false,
        })
    }

    async fn apply_frame(&mut self, turn: &mut Turn, frame: StreamFrame) {
        match frame {
            StreamFrame::Content(text) => {
                self.streaming_content.push_str(&text);
                publish(
                    self.event_tx.as_ref(),
                    Event::StreamingContent(self.streaming_content.clone()),
                )
                .await;
            }
            StreamFrame::ConfirmRequired(request) => {
                log::debug!("Action {} requires confirmation", request.tool_name);
                let pending = PendingConfirmation::new(&turn.conversation_id, request);
                self.streaming_content = pending.display_text.clone();
                self.pending_confirmation = Some(pending.clone());
                self.set_status(ChatStatus::Gated).await;
                publish(self.event_tx.as_ref(), Event::ConfirmationRequired(pending)).await;
            }
            StreamFrame::Done(completion) => self.finalize(turn, completion).await,
            StreamFrame::Error(message) => {
                self.streaming_content.clear();
                self.set_error(ChatError::Backend(message)).await;
                self.set_status(ChatStatus::Idle).await;
            }
        }
    }

    /// Swaps the optimistic message for its persisted counterpart and
    /// appends the assistant reply. Runs at most once per turn.
    async fn finalize(&mut self, turn: &mut Turn, completion: Completion) {
        if turn.finalized {
            log::debug!("Ignoring repeated completion for {}", turn.temp_id);
            return;
        }
        turn.finalized = true;

        let Completion {
            message,
            user_message,
        } = completion;

        let content = if self.streaming_content.is_empty() {
            message.content.clone()
        } else {
            std::mem::take(&mut self.streaming_content)
        };
        let mut assistant = message.with_content(content);
        if assistant.id.is_empty() {
            assistant.id = Message::new_assistant(&turn.conversation_id, "").id;
        }
        if assistant.conversation_id.is_empty() {
            assistant.conversation_id = turn.conversation_id.clone();
        }

        if let Some(current) = self
            .current
            .as_mut()
            .filter(|c| c.id() == turn.conversation_id)
        {
            if let Some(user_message) = user_message {
                current.replace_message(&turn.temp_id, user_message);
            }
            current.append_message(assistant.clone());
        }

        self.streaming_content.clear();
        publish(self.event_tx.as_ref(), Event::MessageAppended(assistant)).await;
        self.set_status(ChatStatus::Idle).await;
    }

    fn begin_loading(&mut self) {
        self.is_loading = true;
        self.error = None;
    }

    /// Records a failed call in the error field before handing it back.
    async fn settle<T>(&mut self, result: Result<T, ApiError>) -> Result<T, ChatError> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                let err = ChatError::from(err);
                self.set_error(err.clone()).await;
                Err(err)
            }
        }
    }

    async fn set_error(&mut self, err: ChatError) {
        log::error!("{}", err);
        self.error = Some(err.clone());
        publish(self.event_tx.as_ref(), Event::Error(err.to_string())).await;
    }

    async fn set_status(&mut self, status: ChatStatus) {
        if self.status == status {
            return;
        }
        log::debug!("Chat status {} -> {}", self.status, status);
        self.status = status;
        publish(self.event_tx.as_ref(), Event::StatusChanged(status)).await;
    }
}
