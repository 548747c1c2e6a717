//! The inference backend seam.
//!
//! The HTTP layer and the stream relay only see these traits; [`bedrock`]
//! provides the real implementation, tests provide in-memory doubles.

pub mod bedrock;
pub mod eventstream;

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::error::Result;
use crate::translate::bedrock_types::{ConverseRequest, ConverseResponse, StreamEvent};

pub use bedrock::BedrockClient;

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// One-shot `converse` call.
    async fn converse(&self, req: &ConverseRequest) -> Result<ConverseResponse>;

    /// Open a `converse-stream` call. Errors here happen before any event is
    /// delivered, so the caller can still answer with a plain error response.
    async fn converse_stream(&self, req: &ConverseRequest) -> Result<Box<dyn EventSource>>;
}

/// Pull-based source of backend stream events.
///
/// `Ok(Some(_))` is the next event, `Ok(None)` the end of the stream and `Err`
/// a transport or protocol failure. Dropping the source releases the
/// underlying connection.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> Result<Option<StreamEvent>>;
}

/// Event source replaying a fixed sequence of results.
#[derive(Debug, Default)]
pub struct ReplaySource {
    events: VecDeque<Result<StreamEvent>>,
}

impl ReplaySource {
    pub fn new(events: impl IntoIterator<Item = Result<StreamEvent>>) -> Self {
        Self {
            events: events.into_iter().collect(),
        }
    }

    pub fn from_events(events: impl IntoIterator<Item = StreamEvent>) -> Self {
        Self::new(events.into_iter().map(Ok))
    }
}

#[async_trait]
impl EventSource for ReplaySource {
    async fn next_event(&mut self) -> Result<Option<StreamEvent>> {
        self.events.pop_front().transpose()
    }
}
