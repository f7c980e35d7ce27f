#[cfg(test)]
#[path = "conversation_test.rs"]
mod tests;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Prefix of client generated ids that have not been confirmed by the server
pub const TEMP_ID_PREFIX: &str = "temp-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationMode {
    #[default]
    Chat,
    Voice,
    Note,
    Scan,
    #[serde(other)]
    Other,
}

impl ConversationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationMode::Chat => "chat",
            ConversationMode::Voice => "voice",
            ConversationMode::Note => "note",
            ConversationMode::Scan => "scan",
            ConversationMode::Other => "other",
        }
    }
}

impl std::fmt::Display for ConversationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConversationMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "chat" => ConversationMode::Chat,
            "voice" => ConversationMode::Voice,
            "note" => ConversationMode::Note,
            "scan" => ConversationMode::Scan,
            _ => ConversationMode::Other,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub conversation_id: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default = "Utc::now", deserialize_with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Message {
    pub fn new(conversation_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            metadata: None,
        }
    }

    /// User message shown before the server has acknowledged it.
    pub fn optimistic_user(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(conversation_id, Role::User, content)
            .with_id(format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4()))
    }

    pub fn new_assistant(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(conversation_id, Role::Assistant, content)
            .with_id(format!("msg-{}", uuid::Uuid::new_v4()))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn is_temporary(&self) -> bool {
        self.id.starts_with(TEMP_ID_PREFIX)
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }
}

/// A conversation with its messages, as loaded from `GET /conversations/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    mode: ConversationMode,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default = "Utc::now", deserialize_with = "timestamp")]
    updated_at: DateTime<Utc>,
}

/// List entry returned by `GET /conversations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub mode: ConversationMode,
    #[serde(default = "Utc::now", deserialize_with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now", deserialize_with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub latest_message: Option<Message>,
}

/// Result of the non streaming send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageExchange {
    pub user_message: Message,
    pub assistant_message: Message,
}

impl Conversation {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            mode: ConversationMode::default(),
            messages: vec![],
            updated_at: Utc::now(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_mode(mut self, mode: ConversationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn mode(&self) -> ConversationMode {
        self.mode
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    /// Appends at the end. Insertion order is the display order.
    pub fn append_message(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    /// Replaces the message holding `temp_id` in place with its persisted
    /// counterpart. Returns false when there is nothing left to replace, so
    /// replaying the same replacement is a no-op.
    pub fn replace_message(&mut self, temp_id: &str, persisted: Message) -> bool {
        let Some(idx) = self.messages.iter().position(|m| m.id == temp_id) else {
            return false;
        };

        if persisted.id != temp_id && self.contains(&persisted.id) {
            self.messages.remove(idx);
        } else {
            self.messages[idx] = persisted;
        }
        self.updated_at = Utc::now();
        true
    }
}

impl From<&Conversation> for ConversationSummary {
    fn from(convo: &Conversation) -> Self {
        Self {
            id: convo.id.clone(),
            user_id: None,
            title: convo.title.clone(),
            mode: convo.mode,
            created_at: convo.updated_at,
            updated_at: convo.updated_at,
            message_count: convo.messages.len(),
            latest_message: convo.messages.last().cloned(),
        }
    }
}

impl From<&ConversationSummary> for Conversation {
    fn from(summary: &ConversationSummary) -> Self {
        Self {
            id: summary.id.clone(),
            title: summary.title.clone(),
            mode: summary.mode,
            messages: vec![],
            updated_at: summary.updated_at,
        }
    }
}

/// Parses an RFC 3339 timestamp, or one without an offset which is taken as
/// UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|ts| ts.and_utc())
}

fn timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(Utc::now()),
        Some(raw) => parse_timestamp(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {:?}", raw))),
    }
}
