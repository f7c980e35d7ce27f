#[cfg(test)]
#[path = "consumer_test.rs"]
mod tests;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::{
    models::{StreamFrame, TestMode},
    session::{decorate, error_message, trim_endpoint},
    storage::ArcCredentialStore,
};

use super::{FrameParser, FrameTx, MessageStreamer, Record, StreamEnd, StreamError};

pub const STREAM_PATH_SUFFIX: &str = "messages/stream";

/// Reads the streaming reply of one message and forwards its frames.
pub struct StreamConsumer {
    http: reqwest::Client,
    endpoint: String,
    test_mode: Option<TestMode>,
    store: ArcCredentialStore,
}

impl StreamConsumer {
    pub fn new(endpoint: &str, store: ArcCredentialStore) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: trim_endpoint(endpoint),
            test_mode: None,
            store,
        }
    }

    pub fn with_test_mode(mut self, test_mode: Option<TestMode>) -> Self {
        self.test_mode = test_mode;
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub async fn stream(
        &self,
        conversation_id: &str,
        content: &str,
        frame_tx: &FrameTx,
        cancel: &CancellationToken,
    ) -> Result<StreamEnd, StreamError> {
        let Some(token) = self.store.get().access_token else {
            return Err(StreamError::MissingCredential);
        };

        let url = format!(
            "{}/conversations/{}/{}",
            self.endpoint, conversation_id, STREAM_PATH_SUFFIX
        );
        let request = decorate(self.http.post(&url), Some(&token), self.test_mode)
            .header(header::ACCEPT, "text/event-stream")
            .json(&json!({ "content": content }));

        log::debug!("Opening stream {}", url);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
            response = request.send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!("Stream request failed with {}: {}", status, body);
            return Err(StreamError::Http {
                status: status.as_u16(),
                message: error_message(status, &body),
            });
        }

        let mut body = std::pin::pin!(response.bytes_stream());
        let mut parser = FrameParser::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::debug!("Stream {} cancelled", url);
                    return Ok(StreamEnd::Cancelled);
                }
                chunk = body.next() => chunk,
            };

            let records = match chunk {
                Some(Ok(bytes)) => parser.feed(&bytes),
                Some(Err(err)) => {
                    log::warn!("Stream {} broke off: {}", url, err);
                    return Err(StreamError::Transport(err.to_string()));
                }
                None => break,
            };
            if let Some(end) = self.forward(records, frame_tx) {
                return Ok(end);
            }
        }

        if let Some(end) = self.forward(parser.finish().into_iter().collect(), frame_tx) {
            return Ok(end);
        }

        log::warn!(
            "Stream {} ended without a terminal frame ({} lines skipped)",
            url,
            parser.skipped()
        );
        Err(StreamError::Interrupted)
    }

    /// Sends frames in order. Returns how the stream ended once a record
    /// stops it.
    fn forward(&self, records: Vec<Record>, frame_tx: &FrameTx) -> Option<StreamEnd> {
        for record in records {
            let (frame, route_trace) = match record {
                Record::DoneMarker => return Some(StreamEnd::DoneMarker),
                Record::Frame { frame, route_trace } => (frame, route_trace),
            };

            if self.test_mode.is_some_and(|mode| mode.is_verbose()) {
                if let Some(trace) = route_trace {
                    log::info!("Route trace {}:\n{}", trace.request_id, trace.summary());
                }
            }

            let end = match &frame {
                StreamFrame::ConfirmRequired(_) => Some(StreamEnd::Gated),
                frame if frame.is_terminal() => Some(StreamEnd::Terminal),
                _ => None,
            };

            if frame_tx.send(frame).is_err() {
                log::debug!("Frame receiver dropped, stopping stream");
                return Some(StreamEnd::Cancelled);
            }
            if end.is_some() {
                return end;
            }
        }
        None
    }
}

#[async_trait]
impl MessageStreamer for StreamConsumer {
    async fn stream_message(
        &self,
        conversation_id: String,
        content: String,
        frame_tx: FrameTx,
        cancel: CancellationToken,
    ) -> Result<StreamEnd, StreamError> {
        self.stream(&conversation_id, &content, &frame_tx, &cancel)
            .await
    }
}
