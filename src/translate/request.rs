//! Translate OpenAI Chat Completions requests into Bedrock Converse requests.
//!
//! System messages move into Converse's separate `system` list; every other
//! message becomes a conversation turn with its role carried over as-is. Both
//! partitions keep the original message order.

use super::bedrock_types::{
    ContentBlock, ConversationRole, ConverseRequest, InferenceConfiguration, Message,
    SystemContentBlock,
};
use super::openai_types::{ChatContent, ChatMessage, ChatRequest, Role};
use crate::error::{ProxyError, Result};

/// Translate a chat request into a Converse request addressed to `model_id`.
/// Pure function: the same translation serves `converse` and `converse-stream`.
///
/// # Errors
/// Returns `ProxyError::Translation` if a message carries anything other than
/// plain-text content.
pub fn chat_to_converse(req: &ChatRequest, model_id: &str) -> Result<ConverseRequest> {
    let mut system = Vec::new();
    let mut messages = Vec::new();

    for (index, msg) in req.messages.iter().enumerate() {
        let text = message_text(msg, index)?;
        match msg.role {
            Role::System => system.push(SystemContentBlock { text }),
            Role::User => messages.push(turn(ConversationRole::User, text)),
            Role::Assistant => messages.push(turn(ConversationRole::Assistant, text)),
        }
    }

    Ok(ConverseRequest {
        model_id: model_id.to_string(),
        messages,
        system,
        inference_config: inference_config(req),
    })
}

fn turn(role: ConversationRole, text: String) -> Message {
    Message {
        role,
        content: vec![ContentBlock::Text { text }],
    }
}

fn message_text(msg: &ChatMessage, index: usize) -> Result<String> {
    match &msg.content {
        ChatContent::Text(text) => Ok(text.clone()),
        ChatContent::Parts(_) => Err(ProxyError::translation(format!(
            "messages[{index}] ({}): only plain-text content is supported",
            msg.role.as_str()
        ))),
    }
}

fn inference_config(req: &ChatRequest) -> Option<InferenceConfiguration> {
    let config = InferenceConfiguration {
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stop_sequences: req
            .stop
            .clone()
            .map(|s| s.into_vec())
            .unwrap_or_default(),
    };

    (!config.is_empty()).then_some(config)
}
