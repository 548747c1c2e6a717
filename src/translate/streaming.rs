//! State machine relaying Bedrock stream events as OpenAI streaming chunks.
//!
//! The [`StreamRelay`] takes Converse stream events one at a time and decides
//! which SSE frame, if any, each one produces. It performs no I/O; the driver in
//! [`crate::proxy`] pulls events and writes the frames.

use super::bedrock_types::{ContentBlock, StreamEvent};
use super::openai_types::{ChatErrorResponse, ChatStreamChunk, ChunkChoice, ChunkDelta, Role};
use super::response::completion_id;
use crate::error::ProxyError;

/// Terminal payload of a successful stream.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Streaming,
    Done,
    Errored,
    Cancelled,
}

impl RelayState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Errored | Self::Cancelled)
    }
}

/// One outbound SSE frame.
#[derive(Debug, Clone)]
pub enum SseFrame {
    Delta(ChatStreamChunk),
    Done,
    Error(ChatErrorResponse),
}

impl SseFrame {
    /// The frame's `data:` payload.
    pub fn data(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Delta(chunk) => serde_json::to_string(chunk),
            Self::Done => Ok(DONE_SENTINEL.to_string()),
            Self::Error(err) => serde_json::to_string(err),
        }
    }

    /// The frame as written on the wire: `data: <payload>\n\n`.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", self.data()?))
    }
}

/// Relays one Converse stream as chat-completion deltas.
///
/// Usage:
///   let mut relay = StreamRelay::new("anthropic.claude-3-sonnet-20240229-v1:0");
///   while let Some(event) = source.next_event().await? {
///       if let Some(frame) = relay.process_event(event) {
///           // write frame
///       }
///       if relay.state().is_terminal() { break; }
///   }
#[derive(Debug)]
pub struct StreamRelay {
    id: String,
    model: String,
    created: i64,
    state: RelayState,
}

impl StreamRelay {
    pub fn new(model: &str) -> Self {
        Self {
            id: completion_id(),
            model: model.to_string(),
            created: chrono::Utc::now().timestamp(),
            state: RelayState::Idle,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Process one backend event, returning the frame it produces, if any.
    pub fn process_event(&mut self, event: StreamEvent) -> Option<SseFrame> {
        if self.state.is_terminal() {
            return None;
        }
        self.state = RelayState::Streaming;

        match event {
            StreamEvent::MessageStart => None,
            StreamEvent::ContentBlockDelta(ContentBlock::Text { text }) => {
                Some(SseFrame::Delta(self.make_chunk(text)))
            }
            StreamEvent::ContentBlockDelta(other) => {
                tracing::debug!(kind = %other.kind(), "Skipping non-text content delta");
                None
            }
            StreamEvent::BlockBoundary | StreamEvent::Metadata { .. } => None,
            StreamEvent::MessageStop { stop_reason } => {
                tracing::debug!(?stop_reason, "Message stopped");
                self.state = RelayState::Done;
                Some(SseFrame::Done)
            }
            StreamEvent::Unrecognized(tag) => {
                tracing::warn!(%tag, "Dropping unrecognized stream event");
                None
            }
        }
    }

    /// Mark the stream failed, returning the error frame to send.
    pub fn fail(&mut self, err: &ProxyError) -> Option<SseFrame> {
        if self.state.is_terminal() {
            return None;
        }
        self.state = RelayState::Errored;
        Some(SseFrame::Error(ChatErrorResponse::from(err)))
    }

    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = RelayState::Cancelled;
        }
    }

    fn make_chunk(&self, text: String) -> ChatStreamChunk {
        ChatStreamChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: Some(Role::Assistant),
                    content: Some(text),
                },
                finish_reason: None,
            }],
        }
    }
}
