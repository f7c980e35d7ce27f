use std::fmt::Display;

/// Orchestrator state for the loaded conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatStatus {
    #[default]
    Idle,
    /// Optimistic message appended, stream not opened yet
    Sending,
    Streaming,
    /// Waiting for the user to confirm or cancel a sensitive action
    Gated,
}

impl ChatStatus {
    pub fn is_busy(&self) -> bool {
        !matches!(self, ChatStatus::Idle)
    }
}

impl Display for ChatStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChatStatus::Idle => "idle",
            ChatStatus::Sending => "sending",
            ChatStatus::Streaming => "streaming",
            ChatStatus::Gated => "gated",
        };
        write!(f, "{}", name)
    }
}
