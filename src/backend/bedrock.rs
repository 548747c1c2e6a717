//! Bedrock Converse client over plain HTTPS with a bearer API key.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use tracing::{debug, warn};

use super::eventstream::{EventStreamDecoder, Frame};
use super::{EventSource, InferenceBackend};
use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::translate::bedrock_types::{
    BedrockErrorBody, ContentBlockDeltaEvent, ConverseRequest, ConverseResponse, MessageStopEvent,
    MetadataEvent, StreamEvent,
};

#[derive(Clone)]
pub struct BedrockClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl BedrockClient {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Build a client from config, resolving the API key from the environment.
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        let api_key = config.resolve_api_key()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.bedrock.timeout_secs))
            .build()?;
        Ok(Self::new(client, config.effective_endpoint(), api_key))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, model_id: &str, action: &str) -> String {
        format!(
            "{}/model/{}/{}",
            self.endpoint,
            encode_model_id(model_id),
            action
        )
    }

    /// POST the request and return the response if it has a success status.
    async fn post(&self, req: &ConverseRequest, action: &str) -> Result<reqwest::Response> {
        let url = self.url(&req.model_id, action);
        debug!(%url, turns = req.messages.len(), system = req.system.len(), "POST");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(req)
            .send()
            .await
            .map_err(|e| ProxyError::backend(format!("Request to {action} failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_type = response
            .headers()
            .get("x-amzn-errortype")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(':').next().unwrap_or(v).to_string());
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<BedrockErrorBody>(&body)
            .map(|b| b.message)
            .unwrap_or_else(|_| truncate(&body, 300).to_string());
        let message = match error_type {
            Some(kind) => format!("{kind}: {message}"),
            None => message,
        };

        warn!(status = status.as_u16(), %message, "Bedrock returned an error");
        Err(ProxyError::backend_status(status.as_u16(), message))
    }
}

#[async_trait]
impl InferenceBackend for BedrockClient {
    async fn converse(&self, req: &ConverseRequest) -> Result<ConverseResponse> {
        let response = self.post(req, "converse").await?;
        let body = response
            .text()
            .await
            .map_err(|e| ProxyError::backend(format!("Failed to read response body: {e}")))?;

        serde_json::from_str(&body).map_err(|e| {
            ProxyError::backend(format!(
                "Failed to parse converse response: {}. Body: {}",
                e,
                truncate(&body, 300)
            ))
        })
    }

    async fn converse_stream(&self, req: &ConverseRequest) -> Result<Box<dyn EventSource>> {
        let response = self.post(req, "converse-stream").await?;
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ProxyError::stream(format!("Byte stream error: {e}"))))
            .boxed();
        Ok(Box::new(BedrockEventSource::new(bytes)))
    }
}

/// Event source decoding a `converse-stream` response body.
pub struct BedrockEventSource {
    bytes: BoxStream<'static, Result<Bytes>>,
    decoder: EventStreamDecoder,
}

impl BedrockEventSource {
    pub fn new(bytes: BoxStream<'static, Result<Bytes>>) -> Self {
        Self {
            bytes,
            decoder: EventStreamDecoder::new(),
        }
    }
}

#[async_trait]
impl EventSource for BedrockEventSource {
    async fn next_event(&mut self) -> Result<Option<StreamEvent>> {
        loop {
            if let Some(frame) = self.decoder.decode()? {
                return frame_to_event(&frame).map(Some);
            }

            match self.bytes.next().await {
                Some(chunk) => self.decoder.extend(&chunk?),
                None if self.decoder.is_empty() => return Ok(None),
                None => {
                    return Err(ProxyError::stream(
                        "Backend stream ended inside an event-stream frame",
                    ))
                }
            }
        }
    }
}

/// Interpret one event-stream frame as a Converse stream event.
pub fn frame_to_event(frame: &Frame) -> Result<StreamEvent> {
    match frame.header_str(":message-type").unwrap_or("event") {
        "event" => {}
        "exception" => {
            let kind = frame.header_str(":exception-type").unwrap_or("exception");
            let message = serde_json::from_slice::<BedrockErrorBody>(&frame.payload)
                .map(|b| b.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&frame.payload).into_owned());
            return Err(ProxyError::backend(format!("{kind}: {message}")));
        }
        "error" => {
            let code = frame.header_str(":error-code").unwrap_or("error");
            let message = frame.header_str(":error-message").unwrap_or_default();
            return Err(ProxyError::backend(format!("{code}: {message}")));
        }
        other => {
            return Err(ProxyError::stream(format!(
                "unknown event-stream message type '{other}'"
            )))
        }
    }

    let event_type = frame.header_str(":event-type").unwrap_or_default();
    let event = match event_type {
        "messageStart" => StreamEvent::MessageStart,
        "contentBlockDelta" => {
            let payload: ContentBlockDeltaEvent = parse_payload(frame, event_type)?;
            StreamEvent::ContentBlockDelta(payload.delta)
        }
        "contentBlockStart" | "contentBlockStop" => StreamEvent::BlockBoundary,
        "messageStop" => {
            let payload: MessageStopEvent = parse_payload(frame, event_type)?;
            StreamEvent::MessageStop {
                stop_reason: payload.stop_reason,
            }
        }
        "metadata" => {
            let payload: MetadataEvent = parse_payload(frame, event_type)?;
            StreamEvent::Metadata {
                usage: payload.usage,
            }
        }
        other => StreamEvent::Unrecognized(other.to_string()),
    };

    Ok(event)
}

fn parse_payload<T: serde::de::DeserializeOwned>(frame: &Frame, event_type: &str) -> Result<T> {
    serde_json::from_slice(&frame.payload)
        .map_err(|e| ProxyError::stream(format!("Malformed {event_type} payload: {e}")))
}

/// Percent-encode the characters of a model id that are not path-safe.
fn encode_model_id(model_id: &str) -> String {
    model_id.replace(':', "%3A").replace('/', "%2F")
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
