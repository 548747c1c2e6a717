use crate::backend::{EventSource, InferenceBackend};
use crate::error::{ProxyError, Result};
use crate::models::ModelPolicy;
use crate::translate::bedrock_types::ConverseRequest;
use crate::translate::openai_types::{ChatRequest, ChatResponse};
use crate::translate::request::chat_to_converse;
use crate::translate::response::converse_to_chat;
use crate::translate::streaming::{SseFrame, StreamRelay};

use futures::stream::Stream;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Stream of outbound SSE frames. An `Err` item means the stream failed after
/// its error frame was sent; the HTTP body must be aborted, not completed.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<SseFrame>> + Send>>;

/// A chat request resolved to a Bedrock model and translated.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub converse: ConverseRequest,
    /// Requested model id when the default model was substituted for it.
    pub fallback_from: Option<String>,
}

/// Select the model and translate the request. No backend call is made.
pub fn prepare(req: &ChatRequest, policy: ModelPolicy) -> Result<PreparedRequest> {
    let choice = policy.select(&req.model)?;
    let converse = chat_to_converse(req, choice.model_id)?;
    Ok(PreparedRequest {
        converse,
        fallback_from: choice.substituted_for,
    })
}

/// Forward a non-streaming request and translate the response.
pub async fn complete(
    converse: &ConverseRequest,
    backend: &dyn InferenceBackend,
) -> Result<ChatResponse> {
    let response = backend.converse(converse).await.map_err(|e| {
        error!(model = %converse.model_id, "converse failed: {}", e);
        e
    })?;

    let chat = converse_to_chat(&response, &converse.model_id)?;

    info!(
        model = %chat.model,
        prompt_tokens = chat.usage.prompt_tokens,
        completion_tokens = chat.usage.completion_tokens,
        "Completed"
    );

    Ok(chat)
}

/// Open a streaming request, returning the relayed frame stream.
///
/// Failures to open the backend stream are returned directly so the caller can
/// still answer with an error status.
pub async fn open_stream(
    converse: &ConverseRequest,
    backend: &dyn InferenceBackend,
    cancel: CancellationToken,
) -> Result<FrameStream> {
    let source = backend.converse_stream(converse).await.map_err(|e| {
        error!(model = %converse.model_id, "converse-stream failed: {}", e);
        e
    })?;

    info!(model = %converse.model_id, "Streaming started");
    Ok(Box::pin(relay_events(
        source,
        StreamRelay::new(&converse.model_id),
        cancel,
    )))
}

/// Pull events from `source` and yield one frame per relayed event, in order.
///
/// The source is polled only after the previous frame has been handed to the
/// consumer. Dropping the returned stream (client disconnect) drops the source
/// and its backend connection; cancelling `cancel` stops it between events.
pub fn relay_events(
    mut source: Box<dyn EventSource>,
    mut relay: StreamRelay,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<SseFrame>> + Send + 'static {
    async_stream::stream! {
        let mut frames = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                next = source.next_event() => Some(next),
            };

            let next = match next {
                Some(next) => next,
                None => {
                    relay.cancel();
                    warn!(frames, "Stream cancelled");
                    yield Err(ProxyError::Cancelled);
                    break;
                }
            };

            let failure = match next {
                Ok(Some(event)) => {
                    if let Some(frame) = relay.process_event(event) {
                        frames += 1;
                        yield Ok(frame);
                    }
                    if relay.state().is_terminal() {
                        break;
                    }
                    continue;
                }
                Ok(None) => ProxyError::stream("Backend stream ended before messageStop"),
                Err(e) => e,
            };

            error!(frames, "Stream failed: {}", failure);
            if let Some(frame) = relay.fail(&failure) {
                yield Ok(frame);
            }
            yield Err(failure);
            break;
        }

        info!(frames, state = ?relay.state(), "Stream finished");
    }
}
