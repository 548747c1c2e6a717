use axum::body::Body;
use axum::http::{Request, StatusCode};
use bedrock_proxy::backend::ReplaySource;
use bedrock_proxy::config::ProxyConfig;
use bedrock_proxy::models::{default_model, ModelPolicy};
use bedrock_proxy::translate::bedrock_types::{
    ContentBlock, ConverseRequest, ConverseResponse, StreamEvent,
};
use bedrock_proxy::{build_router, AppState, EventSource, InferenceBackend, ProxyError, Result};
use async_trait::async_trait;
use http_body_util::BodyExt;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// In-memory backend recording the model id of every call it receives.
struct FakeBackend {
    response: serde_json::Value,
    events: Vec<Result<StreamEvent>>,
    fail_with: Option<u16>,
    seen_models: Mutex<Vec<String>>,
}

impl FakeBackend {
    fn ok() -> Self {
        Self {
            response: serde_json::json!({
                "output": {"message": {"role": "assistant", "content": [{"text": "Hi there"}]}},
                "stopReason": "end_turn",
                "usage": {"inputTokens": 10, "outputTokens": 5, "totalTokens": 15}
            }),
            events: vec![
                Ok(StreamEvent::MessageStart),
                Ok(StreamEvent::ContentBlockDelta(ContentBlock::text("Hello"))),
                Ok(StreamEvent::ContentBlockDelta(ContentBlock::text(" world"))),
                Ok(StreamEvent::MessageStop {
                    stop_reason: Some("end_turn".to_string()),
                }),
            ],
            fail_with: None,
            seen_models: Mutex::new(Vec::new()),
        }
    }

    fn failing(status: u16) -> Self {
        Self {
            fail_with: Some(status),
            ..Self::ok()
        }
    }

    fn with_events(events: Vec<Result<StreamEvent>>) -> Self {
        Self {
            events,
            ..Self::ok()
        }
    }

    fn record(&self, req: &ConverseRequest) -> Result<()> {
        self.seen_models.lock().unwrap().push(req.model_id.clone());
        match self.fail_with {
            Some(status) => Err(ProxyError::backend_status(
                status,
                "ValidationException: The provided model identifier is invalid.",
            )),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl InferenceBackend for FakeBackend {
    async fn converse(&self, req: &ConverseRequest) -> Result<ConverseResponse> {
        self.record(req)?;
        Ok(serde_json::from_value(self.response.clone())?)
    }

    async fn converse_stream(&self, req: &ConverseRequest) -> Result<Box<dyn EventSource>> {
        self.record(req)?;
        let events: Vec<Result<StreamEvent>> = self
            .events
            .iter()
            .map(|e| match e {
                Ok(event) => Ok(event.clone()),
                Err(err) => Err(ProxyError::stream(err.to_string())),
            })
            .collect();
        Ok(Box::new(ReplaySource::new(events)))
    }
}

fn app(backend: Arc<FakeBackend>, policy: ModelPolicy) -> axum::Router {
    let mut config = ProxyConfig::default();
    config.models.policy = policy;
    build_router(Arc::new(AppState {
        config,
        backend,
        shutdown: CancellationToken::new(),
    }))
}

fn chat_post(body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn chat_body(model: &str, stream: bool) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "stream": stream,
        "messages": [
            {"role": "system", "content": "Be brief."},
            {"role": "user", "content": "Hi"}
        ]
    })
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn unknown_model_falls_back_to_default() {
    let backend = Arc::new(FakeBackend::ok());
    let response = app(backend.clone(), ModelPolicy::Fallback)
        .oneshot(chat_post(&chat_body("unknown-model", false)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let fallback = response
        .headers()
        .get("x-model-fallback")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(fallback.starts_with("unknown-model"));
    assert_eq!(*backend.seen_models.lock().unwrap(), vec![default_model()]);

    let body = json_body(response).await;
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], default_model());
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(body["choices"][0]["message"]["content"], "Hi there");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["usage"]["prompt_tokens"], 10);
    assert_eq!(body["usage"]["completion_tokens"], 5);
    assert_eq!(body["usage"]["total_tokens"], 15);
    assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));
}

#[tokio::test]
async fn supported_model_is_dispatched_unchanged() {
    let backend = Arc::new(FakeBackend::ok());
    let model = "anthropic.claude-3-haiku-20240307-v1:0";
    let response = app(backend.clone(), ModelPolicy::Fallback)
        .oneshot(chat_post(&chat_body(model, false)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-model-fallback").is_none());
    assert_eq!(*backend.seen_models.lock().unwrap(), vec![model]);
}

#[tokio::test]
async fn reject_policy_refuses_unknown_model() {
    let backend = Arc::new(FakeBackend::ok());
    let response = app(backend.clone(), ModelPolicy::Reject)
        .oneshot(chat_post(&chat_body("gpt-4o", false)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(backend.seen_models.lock().unwrap().is_empty());
    let body = json_body(response).await;
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn backend_error_is_reported_without_choices() {
    let backend = Arc::new(FakeBackend::failing(400));
    let response = app(backend, ModelPolicy::Fallback)
        .oneshot(chat_post(&chat_body(default_model(), false)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert!(body.get("choices").is_none());
    assert_eq!(body["error"]["type"], "upstream_error");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("ValidationException"));
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let backend = Arc::new(FakeBackend::ok());
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app(backend.clone(), ModelPolicy::Fallback)
        .oneshot(request)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(backend.seen_models.lock().unwrap().is_empty());
}

#[tokio::test]
async fn multimodal_content_is_refused() {
    let backend = Arc::new(FakeBackend::ok());
    let body = serde_json::json!({
        "model": default_model(),
        "messages": [{
            "role": "user",
            "content": [{"type": "image_url", "image_url": {"url": "data:..."}}]
        }]
    });

    let response = app(backend.clone(), ModelPolicy::Fallback)
        .oneshot(chat_post(&body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(backend.seen_models.lock().unwrap().is_empty());
}

#[tokio::test]
async fn streaming_relays_deltas_then_done() {
    let backend = Arc::new(FakeBackend::ok());
    let response = app(backend, ModelPolicy::Fallback)
        .oneshot(chat_post(&chat_body(default_model(), true)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = std::str::from_utf8(&bytes).unwrap();
    let payloads: Vec<&str> = text
        .split("\n\n")
        .filter(|f| !f.is_empty())
        .map(|f| f.strip_prefix("data: ").unwrap())
        .collect();

    assert_eq!(payloads.len(), 3);
    let first: serde_json::Value = serde_json::from_str(payloads[0]).unwrap();
    let second: serde_json::Value = serde_json::from_str(payloads[1]).unwrap();
    assert_eq!(first["object"], "chat.completion.chunk");
    assert_eq!(first["choices"][0]["delta"]["content"], "Hello");
    assert_eq!(second["choices"][0]["delta"]["content"], " world");
    assert_eq!(first["id"], second["id"]);
    assert_eq!(payloads[2], "[DONE]");
}

#[tokio::test]
async fn streaming_failure_aborts_the_body() {
    let backend = Arc::new(FakeBackend::with_events(vec![
        Ok(StreamEvent::MessageStart),
        Ok(StreamEvent::ContentBlockDelta(ContentBlock::text("partial"))),
        Err(ProxyError::stream("connection reset")),
    ]));
    let response = app(backend, ModelPolicy::Fallback)
        .oneshot(chat_post(&chat_body(default_model(), true)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.into_body().collect().await.is_err());
}

#[tokio::test]
async fn streaming_open_failure_is_an_error_response() {
    let backend = Arc::new(FakeBackend::failing(403));
    let response = app(backend, ModelPolicy::Fallback)
        .oneshot(chat_post(&chat_body(default_model(), true)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert_eq!(body["error"]["type"], "upstream_error");
}

#[tokio::test]
async fn home_health_and_models_routes() {
    let router = app(Arc::new(FakeBackend::ok()), ModelPolicy::Fallback);

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"Hello bedrock api proxy...");

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ok");

    let response = router
        .oneshot(Request::builder().uri("/v1/models").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["object"], "list");
    assert_eq!(body["data"][0]["id"], default_model());
}

#[tokio::test]
#[ignore = "requires AWS_BEARER_TOKEN_BEDROCK"]
async fn live_bedrock_roundtrip() {
    let config = ProxyConfig::default();
    let backend = bedrock_proxy::BedrockClient::from_config(&config).unwrap();
    let state = Arc::new(AppState {
        config,
        backend: Arc::new(backend),
        shutdown: CancellationToken::new(),
    });

    let response = build_router(state)
        .oneshot(chat_post(&serde_json::json!({
            "model": "anthropic.claude-3-haiku-20240307-v1:0",
            "max_tokens": 30,
            "messages": [{"role": "user", "content": "Say 'pong'"}]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    println!("Bedrock response: {body}");
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert!(body["usage"]["total_tokens"].as_u64().unwrap() > 0);
}
