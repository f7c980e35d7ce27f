use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ConfirmationRequest;

/// Gate state held by the orchestrator between a `confirmRequired` frame and
/// the caller's confirm or cancel.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingConfirmation {
    pub tool_name: String,
    pub tool_params: Value,
    pub provider: Option<String>,
    pub conversation_id: String,
    pub display_text: String,
}

/// Body of `POST /mcp/confirm`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmPayload {
    pub tool_name: String,
    pub tool_params: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfirmResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl PendingConfirmation {
    pub fn new(conversation_id: impl Into<String>, request: ConfirmationRequest) -> Self {
        Self {
            tool_name: request.tool_name,
            tool_params: request.tool_params,
            provider: request.provider,
            conversation_id: conversation_id.into(),
            display_text: request.trace_text,
        }
    }

    pub fn payload(&self) -> ConfirmPayload {
        ConfirmPayload {
            tool_name: self.tool_name.clone(),
            tool_params: self.tool_params.clone(),
            provider: self.provider.clone(),
        }
    }
}

impl ConfirmResult {
    /// Text of the assistant message describing the outcome.
    pub fn describe(&self) -> String {
        if self.success {
            let data = self
                .data
                .as_ref()
                .and_then(|data| serde_json::to_string_pretty(data).ok())
                .unwrap_or_default();
            format!("Action executed.\n\n{}", data).trim_end().to_string()
        } else {
            format!(
                "Action failed: {}",
                self.error.as_deref().unwrap_or("unknown error")
            )
        }
    }
}
