use super::bedrock_types::{ContentBlock, ConverseResponse, TokenUsage};
use super::openai_types::{ChatResponse, ChatUsage, Choice, ChoiceMessage, Role};
use crate::error::{ProxyError, Result};

/// Translate a Bedrock Converse response into an OpenAI Chat Completion response.
/// Pure function: `model` is the Bedrock model id the request was sent to.
///
/// # Errors
/// Returns `ProxyError::UnsupportedContentType` when the output is not a text
/// message and `ProxyError::MissingUsage` when a token counter is absent.
pub fn converse_to_chat(resp: &ConverseResponse, model: &str) -> Result<ChatResponse> {
    let message = resp
        .output
        .message
        .as_ref()
        .ok_or_else(|| ProxyError::unsupported_content("output is not a message"))?;

    let text = match message.content.first() {
        Some(ContentBlock::Text { text }) => text.clone(),
        Some(other) => return Err(ProxyError::unsupported_content(other.kind())),
        None => return Err(ProxyError::unsupported_content("empty message content")),
    };

    let usage = map_usage(resp.usage.as_ref())?;

    Ok(ChatResponse {
        id: completion_id(),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: Role::Assistant,
                content: text,
            },
            finish_reason: Some(map_stop_reason(&resp.stop_reason)),
        }],
        usage,
    })
}

fn map_usage(usage: Option<&TokenUsage>) -> Result<ChatUsage> {
    let usage = usage.ok_or(ProxyError::MissingUsage { field: "usage" })?;

    Ok(ChatUsage {
        prompt_tokens: usage.input_tokens.ok_or(ProxyError::MissingUsage {
            field: "inputTokens",
        })?,
        completion_tokens: usage.output_tokens.ok_or(ProxyError::MissingUsage {
            field: "outputTokens",
        })?,
        total_tokens: usage.total_tokens.ok_or(ProxyError::MissingUsage {
            field: "totalTokens",
        })?,
    })
}

/// Map Bedrock stopReason to OpenAI finish_reason
pub fn map_stop_reason(reason: &str) -> String {
    match reason {
        "end_turn" | "stop_sequence" => "stop".to_string(),
        "max_tokens" => "length".to_string(),
        "tool_use" => "tool_calls".to_string(),
        "guardrail_intervened" | "content_filtered" => "content_filter".to_string(),
        other => {
            tracing::debug!(stop_reason = other, "Passing through unmapped stop reason");
            other.to_string()
        }
    }
}

/// A fresh OpenAI-style completion id.
pub fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}
