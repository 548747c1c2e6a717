//! Type definitions for the [Bedrock Converse API](https://docs.aws.amazon.com/bedrock/latest/APIReference/API_runtime_Converse.html).
//!
//! Content blocks and usage counters are modelled loosely. Bedrock unions can
//! carry members this proxy cannot express; those must deserialize so they can
//! be reported as unsupported content.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request types (what we send TO Bedrock)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseRequest {
    /// Sent in the URL path, not the body.
    #[serde(skip)]
    pub model_id: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub system: Vec<SystemContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_config: Option<InferenceConfiguration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: ConversationRole,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationRole {
    User,
    Assistant,
}

/// A Bedrock `ContentBlock` union. Anything that is not a text member is kept
/// as its raw JSON object so the caller can name what it got.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentBlock {
    Text { text: String },
    Other(serde_json::Map<String, serde_json::Value>),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// The union member name, e.g. `text`, `image`, `toolUse`.
    pub fn kind(&self) -> String {
        match self {
            Self::Text { .. } => "text".to_string(),
            Self::Other(map) => map
                .keys()
                .next()
                .cloned()
                .unwrap_or_else(|| "empty".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemContentBlock {
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfiguration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

impl InferenceConfiguration {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// ---------------------------------------------------------------------------
// Response types (what Bedrock sends back)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseResponse {
    pub output: ConverseOutput,
    pub stop_reason: String,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

/// The `ConverseOutput` union; `message` is the only member we understand.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConverseOutput {
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct BedrockErrorBody {
    #[serde(alias = "Message")]
    pub message: String,
}

// ---------------------------------------------------------------------------
// Stream event payloads (`converse-stream`)
// ---------------------------------------------------------------------------

/// One decoded `converse-stream` event, as consumed by the stream relay.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    MessageStart,
    /// `contentBlockDelta`; the delta is a `ContentBlock`-shaped union.
    ContentBlockDelta(ContentBlock),
    /// `contentBlockStart` or `contentBlockStop`.
    BlockBoundary,
    MessageStop { stop_reason: Option<String> },
    Metadata { usage: Option<TokenUsage> },
    Unrecognized(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlockDeltaEvent {
    pub delta: ContentBlock,
    #[serde(default)]
    pub content_block_index: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStopEvent {
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataEvent {
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}
