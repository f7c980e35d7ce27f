pub mod consumer;
pub mod error;
pub mod parser;

pub use consumer::{STREAM_PATH_SUFFIX, StreamConsumer};
pub use error::StreamError;
pub use parser::{FrameParser, Record};

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::StreamFrame;

/// Frames are delivered in the order they were read.
pub type FrameTx = mpsc::UnboundedSender<StreamFrame>;

/// Why a stream stopped without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// A `done` or `error` frame was delivered
    Terminal,
    /// A confirmation was requested, no further frames are expected
    Gated,
    /// `data: [DONE]` arrived without a preceding terminal frame
    DoneMarker,
    /// The caller cancelled or stopped listening
    Cancelled,
}

#[async_trait]
#[cfg_attr(test, automock)]
pub trait MessageStreamer {
    /// Posts `content` to the conversation and forwards every frame of the
    /// reply to `frame_tx` until a terminal frame, a confirmation request or
    /// cancellation.
    async fn stream_message(
        &self,
        conversation_id: String,
        content: String,
        frame_tx: FrameTx,
        cancel: CancellationToken,
    ) -> Result<StreamEnd, StreamError>;
}

pub type ArcMessageStreamer = Arc<dyn MessageStreamer + Send + Sync>;
