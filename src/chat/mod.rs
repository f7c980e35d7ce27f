pub mod error;
pub mod orchestrator;

pub use error::ChatError;
pub use orchestrator::{AbortHandle, Orchestrator};

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::{
    models::{
        ConfirmPayload, ConfirmResult, Conversation, ConversationMode, ConversationSummary,
        MessageExchange,
    },
    session::ApiError,
};

/// REST calls the orchestrator depends on.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait ChatApi {
    async fn list_conversations(
        &self,
        mode: Option<ConversationMode>,
    ) -> Result<Vec<ConversationSummary>, ApiError>;

    async fn get_conversation(&self, id: String) -> Result<Conversation, ApiError>;

    async fn create_conversation(
        &self,
        mode: ConversationMode,
        title: Option<String>,
    ) -> Result<ConversationSummary, ApiError>;

    async fn delete_conversation(&self, id: String) -> Result<(), ApiError>;

    async fn send_message(
        &self,
        conversation_id: String,
        content: String,
    ) -> Result<MessageExchange, ApiError>;

    async fn confirm_execution(&self, payload: ConfirmPayload) -> Result<ConfirmResult, ApiError>;
}

pub type ArcChatApi = Arc<dyn ChatApi + Send + Sync>;
