//! Demonstrate using the translation layer without a server.
//!
//! Usage:
//!   `cargo run --example translate_only`

use bedrock_proxy::translate::bedrock_types::{ContentBlock, ConverseResponse, StreamEvent};
use bedrock_proxy::translate::openai_types::{ChatMessage, ChatRequest, Role};
use bedrock_proxy::translate::request::chat_to_converse;
use bedrock_proxy::translate::response::converse_to_chat;
use bedrock_proxy::translate::streaming::StreamRelay;

fn main() -> anyhow::Result<()> {
    // An OpenAI chat completions request, as a client would send it
    let chat_req = ChatRequest {
        model: "anthropic.claude-3-sonnet-20240229-v1:0".to_string(),
        messages: vec![
            ChatMessage::new(Role::System, "You are a geography expert. Be concise."),
            ChatMessage::new(Role::User, "What is the capital of France?"),
            ChatMessage::new(Role::Assistant, "The capital of France is Paris."),
            ChatMessage::new(Role::User, "And Germany?"),
        ],
        stream: true,
        max_tokens: Some(256),
        temperature: Some(0.7),
        top_p: None,
        stop: None,
    };

    let converse = chat_to_converse(&chat_req, &chat_req.model)?;

    println!("=== Translated Request (Bedrock Converse) ===");
    println!("POST /model/{}/converse", converse.model_id);
    println!("{}", serde_json::to_string_pretty(&converse)?);

    // A Converse response, translated back
    let converse_resp: ConverseResponse = serde_json::from_value(serde_json::json!({
        "output": {
            "message": {
                "role": "assistant",
                "content": [{"text": "The capital of Germany is Berlin."}]
            }
        },
        "stopReason": "end_turn",
        "usage": {"inputTokens": 42, "outputTokens": 8, "totalTokens": 50}
    }))?;

    let chat_resp = converse_to_chat(&converse_resp, &converse.model_id)?;

    println!();
    println!("=== Translated Response (OpenAI format) ===");
    println!("{}", serde_json::to_string_pretty(&chat_resp)?);

    println!();
    println!("=== Streaming Relay Demo ===");

    let mut relay = StreamRelay::new(&converse.model_id);
    let events = vec![
        StreamEvent::MessageStart,
        StreamEvent::ContentBlockDelta(ContentBlock::text("The")),
        StreamEvent::ContentBlockDelta(ContentBlock::text(" capital")),
        StreamEvent::ContentBlockDelta(ContentBlock::text(" is Berlin.")),
        StreamEvent::BlockBoundary,
        StreamEvent::MessageStop {
            stop_reason: Some("end_turn".to_string()),
        },
    ];

    for event in events {
        if let Some(frame) = relay.process_event(event) {
            print!("{}", frame.to_wire()?);
        }
    }

    println!("Done! The translation layer works without any network calls.");
    Ok(())
}
