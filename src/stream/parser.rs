#[cfg(test)]
#[path = "parser_test.rs"]
mod tests;

use serde::Deserialize;
use serde_json::Value;

use crate::models::{
    Completion, ConfirmationRequest, Message, Role, RouteTrace, StreamFrame,
};

const DATA_PREFIX: &str = "data:";
const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Frame {
        frame: StreamFrame,
        route_trace: Option<RouteTrace>,
    },
    /// The literal `data: [DONE]` end marker
    DoneMarker,
}

/// Incremental parser for `data: <json>` lines.
///
/// Bytes are buffered until a newline completes a line, so records split
/// across network chunks are reassembled. Lines that fail to decode are
/// counted and skipped.
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: Vec<u8>,
    skipped: usize,
}

#[derive(Debug, Default, Deserialize)]
struct FramePayload {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    user_message: Option<Value>,
    #[serde(default)]
    requires_confirmation: bool,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    tool_params: Option<Value>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    route_trace: Option<Value>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lines dropped because they could not be decoded.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Record> {
        self.buffer.extend_from_slice(chunk);

        let mut records = vec![];
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line = self.buffer.drain(..=pos).collect::<Vec<_>>();
            if let Some(record) = self.parse_line(&line[..pos]) {
                records.push(record);
            }
        }
        records
    }

    /// Parses whatever is left once the body has ended without a final
    /// newline.
    pub fn finish(&mut self) -> Option<Record> {
        let line = std::mem::take(&mut self.buffer);
        if line.is_empty() {
            return None;
        }
        self.parse_line(&line)
    }

    fn parse_line(&mut self, raw: &[u8]) -> Option<Record> {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim_end_matches('\r'),
            Err(err) => {
                log::warn!("Skipping stream line that is not UTF-8: {}", err);
                self.skipped += 1;
                return None;
            }
        };
        log::trace!("stream line: {}", line);

        let data = line.strip_prefix(DATA_PREFIX)?.trim();
        if data.is_empty() {
            return None;
        }
        if data == DONE_MARKER {
            return Some(Record::DoneMarker);
        }

        let payload = match serde_json::from_str::<FramePayload>(data) {
            Ok(payload) => payload,
            Err(err) => {
                log::warn!("Skipping malformed stream record: {}: {}", err, data);
                self.skipped += 1;
                return None;
            }
        };

        payload.into_record()
    }
}

impl FramePayload {
    fn into_record(mut self) -> Option<Record> {
        let route_trace = self.route_trace.take().and_then(RouteTrace::from_value);
        let kind = self.kind.take();

        let frame = if self.requires_confirmation {
            Some(self.into_confirmation(route_trace.as_ref()))
        } else {
            match kind.as_deref() {
                Some("content") => Some(StreamFrame::Content(self.content.unwrap_or_default())),
                Some("done") => Some(self.into_completion()),
                Some("error") => Some(StreamFrame::Error(self.error_text())),
                other => {
                    log::debug!("Ignoring stream record of type {:?}", other);
                    None
                }
            }
        };

        frame.map(|frame| Record::Frame { frame, route_trace })
    }

    fn into_confirmation(self, route_trace: Option<&RouteTrace>) -> StreamFrame {
        let details = route_trace.map(|trace| &trace.details);

        let tool_name = self
            .tool_name
            .filter(|name| !name.is_empty())
            .or_else(|| details.map(|d| d.tool_name.clone()))
            .unwrap_or_default();
        let tool_params = self
            .tool_params
            .filter(|params| !params.is_null())
            .or_else(|| details.map(|d| d.tool_params.clone()))
            .unwrap_or(Value::Null);
        let provider = self
            .provider
            .or_else(|| details.and_then(|d| d.detected_provider.clone()));
        let trace_text = self
            .content
            .filter(|text| !text.is_empty())
            .or_else(|| route_trace.map(RouteTrace::summary))
            .unwrap_or_else(|| format!("Confirm {}", tool_name));

        StreamFrame::ConfirmRequired(ConfirmationRequest {
            tool_name,
            tool_params,
            provider,
            trace_text,
            route_trace: route_trace.cloned(),
        })
    }

    /// A `done` frame always ends the turn, even when its message cannot be
    /// decoded.
    fn into_completion(self) -> StreamFrame {
        let fallback = self.content.unwrap_or_default();
        let message = match self.message {
            Some(value) => {
                let content = value
                    .get("content")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| fallback.clone());
                decode_message(value, Role::Assistant)
                    .inspect_err(|err| log::warn!("Ignoring undecodable done message: {}", err))
                    .unwrap_or_else(|_| Message::new("", Role::Assistant, content).with_id(""))
            }
            None => Message::new("", Role::Assistant, fallback).with_id(""),
        };

        let user_message = self.user_message.and_then(|value| {
            decode_message(value, Role::User)
                .inspect_err(|err| log::warn!("Ignoring undecodable user message: {}", err))
                .ok()
        });

        StreamFrame::Done(Completion {
            message,
            user_message,
        })
    }

    fn error_text(&self) -> String {
        self.error
            .as_ref()
            .and_then(describe_error)
            .or_else(|| self.message.as_ref().and_then(describe_error))
            .unwrap_or_else(|| "unknown stream error".to_string())
    }
}

fn decode_message(mut value: Value, role: Role) -> Result<Message, serde_json::Error> {
    if let Value::Object(map) = &mut value {
        map.entry("role")
            .or_insert_with(|| serde_json::to_value(role).unwrap_or(Value::Null));
    }
    serde_json::from_value(value)
}

fn describe_error(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Object(map) => map
            .get("message")
            .and_then(describe_error)
            .or_else(|| Some(value.to_string())),
        other => Some(other.to_string()),
    }
}
