use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Message;

/// Key some backends wrap the route trace object in
const ROUTE_TRACE_WRAPPER: &str = "🔍 ROUTE TRACE";

/// One discrete, typed unit of the streaming protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Content(String),
    ConfirmRequired(ConfirmationRequest),
    Done(Completion),
    Error(String),
}

/// Payload of a `done` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// The finalized assistant message
    pub message: Message,
    /// The persisted counterpart of the optimistic user message, if the
    /// backend sent one
    pub user_message: Option<Message>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationRequest {
    pub tool_name: String,
    pub tool_params: Value,
    pub provider: Option<String>,
    /// Shown as provisional content while the gate is open
    pub trace_text: String,
    pub route_trace: Option<RouteTrace>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RouteTrace {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub details: RouteDetails,
    #[serde(default)]
    pub test_mode: u8,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RouteDetails {
    #[serde(default)]
    pub input_source: String,
    #[serde(default)]
    pub original_input: String,
    #[serde(default)]
    pub detected_intent: String,
    #[serde(default)]
    pub detected_provider: Option<String>,
    #[serde(default)]
    pub selected_mcp: String,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub tool_params: Value,
}

impl StreamFrame {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamFrame::Done(_) | StreamFrame::Error(_))
    }
}

impl RouteTrace {
    /// Decodes a `route_trace` value, accepting both the bare object and the
    /// object wrapped in a single `"🔍 ROUTE TRACE"` key.
    pub fn from_value(value: Value) -> Option<Self> {
        let value = match value {
            Value::Object(mut map) if map.contains_key(ROUTE_TRACE_WRAPPER) => {
                map.remove(ROUTE_TRACE_WRAPPER)?
            }
            Value::Null => return None,
            other => other,
        };
        match serde_json::from_value(value) {
            Ok(trace) => Some(trace),
            Err(err) => {
                log::warn!("Ignoring undecodable route trace: {}", err);
                None
            }
        }
    }

    pub fn summary(&self) -> String {
        let details = &self.details;
        let mut lines = vec![format!("Route: {}", self.path)];
        if !details.detected_intent.is_empty() {
            lines.push(format!("Intent: {}", details.detected_intent));
        }
        lines.push(format!(
            "Provider: {}",
            details.detected_provider.as_deref().unwrap_or("(auto)")
        ));
        if !details.selected_mcp.is_empty() {
            lines.push(format!("MCP: {}", details.selected_mcp));
        }
        lines.push(format!("Tool: {}", details.tool_name));
        if !details.tool_params.is_null() {
            lines.push(format!("Params: {}", details.tool_params));
        }
        lines.join("\n")
    }
}
