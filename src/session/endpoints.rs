#[cfg(test)]
#[path = "endpoints_test.rs"]
mod tests;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    chat::ChatApi,
    models::{
        ConfirmPayload, ConfirmResult, Conversation, ConversationMode, ConversationSummary,
        DeviceAuthorization, DevicePoll, InboxFilter, InboxModification, MessageExchange,
        NewCalendarEvent, NewInboxItem,
    },
};

use super::{ApiError, ApiRequest, SessionClient};

const OPEN_TASK_STATUSES: &str = "new,in_progress,overdue";
const DEFAULT_INBOX_LIMIT: u32 = 100;

#[derive(Deserialize)]
#[serde(untagged)]
enum TaskList {
    Bare(Vec<Value>),
    Wrapped {
        #[serde(default)]
        tasks: Vec<Value>,
    },
}

#[derive(Deserialize)]
struct Total {
    #[serde(default)]
    total: u64,
}

#[derive(Deserialize)]
struct Count {
    #[serde(default)]
    count: u64,
}

#[derive(Deserialize)]
struct PollResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    pending: bool,
}

// Conversations
impl SessionClient {
    pub async fn create_conversation(
        &self,
        mode: ConversationMode,
        title: Option<&str>,
    ) -> Result<ConversationSummary, ApiError> {
        let mut body = json!({ "mode": mode.as_str() });
        if let Some(title) = title.filter(|t| !t.is_empty()) {
            body["title"] = json!(title);
        }
        self.send_json(ApiRequest::post("/conversations").with_json(body))
            .await
    }

    pub async fn list_conversations(
        &self,
        mode: Option<ConversationMode>,
    ) -> Result<Vec<ConversationSummary>, ApiError> {
        let request = ApiRequest::get("/conversations").with_query("mode", mode.map(|m| m.as_str()));
        self.send_json(request).await
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Conversation, ApiError> {
        self.send_json(ApiRequest::get(format!("/conversations/{id}")))
            .await
    }

    pub async fn delete_conversation(&self, id: &str) -> Result<(), ApiError> {
        self.send_empty(ApiRequest::delete(format!("/conversations/{id}")))
            .await
    }

    pub async fn generate_title(&self, id: &str) -> Result<Value, ApiError> {
        self.send_json(ApiRequest::post(format!("/conversations/{id}/generate-title")))
            .await
    }

    /// Non streaming send, the reply arrives in one response.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<MessageExchange, ApiError> {
        let request = ApiRequest::post(format!("/conversations/{conversation_id}/messages"))
            .with_json(json!({ "content": content }));
        self.send_json(request).await
    }

    pub async fn confirm_execution(
        &self,
        payload: &ConfirmPayload,
    ) -> Result<ConfirmResult, ApiError> {
        let request = ApiRequest::post("/mcp/confirm").with_json(serde_json::to_value(payload)?);
        self.send_json(request).await
    }
}

// Tasks and notes
impl SessionClient {
    pub async fn open_tasks_count(&self) -> Result<usize, ApiError> {
        let request = ApiRequest::get("/tasks")
            .with_query("status", Some(OPEN_TASK_STATUSES))
            .with_query("limit", Some(1000));
        let tasks = match self.send_json::<TaskList>(request).await? {
            TaskList::Bare(tasks) => tasks,
            TaskList::Wrapped { tasks } => tasks,
        };
        Ok(tasks.len())
    }

    pub async fn notes_count(&self) -> Result<u64, ApiError> {
        let request = ApiRequest::get("/notes").with_query("limit", Some(1));
        Ok(self.send_json::<Total>(request).await?.total)
    }
}

// Inbox
impl SessionClient {
    pub async fn list_inbox(&self, filter: &InboxFilter) -> Result<Value, ApiError> {
        let request = ApiRequest::get("/inbox")
            .with_query("status_filter", filter.status.as_deref())
            .with_query("type_filter", filter.kind.as_deref())
            .with_query("priority", filter.priority.as_deref())
            .with_query("skip", Some(filter.skip.unwrap_or(0)))
            .with_query("limit", Some(filter.limit.unwrap_or(DEFAULT_INBOX_LIMIT)));
        self.send_json(request).await
    }

    pub async fn get_inbox_item(&self, id: &str) -> Result<Value, ApiError> {
        self.send_json(ApiRequest::get(format!("/inbox/{id}"))).await
    }

    pub async fn create_inbox_item(&self, item: &NewInboxItem) -> Result<Value, ApiError> {
        let request = ApiRequest::post("/inbox").with_json(serde_json::to_value(item)?);
        self.send_json(request).await
    }

    pub async fn suggest_inbox_action(&self, id: &str) -> Result<Value, ApiError> {
        self.send_json(ApiRequest::post(format!("/inbox/{id}/suggest")))
            .await
    }

    pub async fn accept_inbox_suggestion(&self, id: &str) -> Result<Value, ApiError> {
        self.send_json(ApiRequest::post(format!("/inbox/{id}/accept")))
            .await
    }

    pub async fn modify_inbox_item(
        &self,
        id: &str,
        modification: &InboxModification,
    ) -> Result<Value, ApiError> {
        let request = ApiRequest::post(format!("/inbox/{id}/modify"))
            .with_json(serde_json::to_value(modification)?);
        self.send_json(request).await
    }

    pub async fn reject_inbox_item(&self, id: &str, reason: Option<&str>) -> Result<Value, ApiError> {
        let request =
            ApiRequest::post(format!("/inbox/{id}/reject")).with_json(json!({ "reason": reason }));
        self.send_json(request).await
    }

    pub async fn archive_inbox_item(&self, id: &str) -> Result<Value, ApiError> {
        self.send_json(ApiRequest::post(format!("/inbox/{id}/archive")))
            .await
    }

    pub async fn delete_inbox_item(&self, id: &str) -> Result<(), ApiError> {
        self.send_empty(ApiRequest::delete(format!("/inbox/{id}")))
            .await
    }

    pub async fn inbox_count(&self) -> Result<u64, ApiError> {
        Ok(self
            .send_json::<Count>(ApiRequest::get("/inbox/count"))
            .await?
            .count)
    }
}

// Calendar
impl SessionClient {
    pub async fn start_calendar_authorization(&self) -> Result<DeviceAuthorization, ApiError> {
        self.send_json(ApiRequest::post("/calendar/oauth/microsoft/start"))
            .await
    }

    /// One poll of the device flow. `428` and `{"pending": true}` both mean
    /// the user has not finished yet.
    pub async fn poll_calendar_authorization(
        &self,
        device_code: &str,
    ) -> Result<DevicePoll, ApiError> {
        let request = ApiRequest::post("/calendar/oauth/microsoft/poll").with_json(json!({
            "device_code": device_code,
            "set_as_primary": true,
        }));

        let body: Value = match self.send_json(request).await {
            Ok(body) => body,
            Err(ApiError::Http { status: 428, .. }) => return Ok(DevicePoll::Pending),
            Err(err) => return Err(err),
        };

        let status = PollResponse::deserialize(&body)
            .map_err(|err| ApiError::Decode(err.to_string()))?;
        if status.pending && !status.success {
            Ok(DevicePoll::Pending)
        } else {
            Ok(DevicePoll::Connected(body))
        }
    }

    pub async fn connected_calendars(&self) -> Result<Value, ApiError> {
        self.send_json(ApiRequest::get("/calendar/oauth/connected"))
            .await
    }

    pub async fn disconnect_calendar(&self, provider: &str) -> Result<(), ApiError> {
        self.send_empty(ApiRequest::delete(format!("/calendar/oauth/{provider}")))
            .await
    }

    pub async fn create_calendar_event(&self, event: &NewCalendarEvent) -> Result<Value, ApiError> {
        let request = ApiRequest::post("/calendar/events").with_json(serde_json::to_value(event)?);
        self.send_json(request).await
    }

    pub async fn list_calendar_events(
        &self,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Result<Value, ApiError> {
        let request = ApiRequest::get("/calendar/events")
            .with_query("start_date", start_date)
            .with_query("end_date", end_date);
        self.send_json(request).await
    }
}

#[async_trait]
impl ChatApi for SessionClient {
    async fn list_conversations(
        &self,
        mode: Option<ConversationMode>,
    ) -> Result<Vec<ConversationSummary>, ApiError> {
        SessionClient::list_conversations(self, mode).await
    }

    async fn get_conversation(&self, id: String) -> Result<Conversation, ApiError> {
        SessionClient::get_conversation(self, &id).await
    }

    async fn create_conversation(
        &self,
        mode: ConversationMode,
        title: Option<String>,
    ) -> Result<ConversationSummary, ApiError> {
        SessionClient::create_conversation(self, mode, title.as_deref()).await
    }

    async fn delete_conversation(&self, id: String) -> Result<(), ApiError> {
        SessionClient::delete_conversation(self, &id).await
    }

    async fn send_message(
        &self,
        conversation_id: String,
        content: String,
    ) -> Result<MessageExchange, ApiError> {
        SessionClient::send_message(self, &conversation_id, &content).await
    }

    async fn confirm_execution(&self, payload: ConfirmPayload) -> Result<ConfirmResult, ApiError> {
        SessionClient::confirm_execution(self, &payload).await
    }
}
