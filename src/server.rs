use crate::backend::InferenceBackend;
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::models::SUPPORTED_MODELS;
use crate::proxy;
use crate::translate::bedrock_types::ConverseRequest;
use crate::translate::openai_types::{ChatErrorResponse, ChatRequest};

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Set on responses whose requested model was replaced by the default.
pub const MODEL_FALLBACK_HEADER: &str = "x-model-fallback";

#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub backend: Arc<dyn InferenceBackend>,
    /// Cancelled on server shutdown; every active stream observes a child token.
    pub shutdown: CancellationToken,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(MODEL_FALLBACK_HEADER),
        ]);

    Router::new()
        .route("/", get(handle_home))
        .route("/health", get(handle_health))
        .route("/v1/models", get(handle_models))
        .route("/v1/chat/completions", post(handle_chat_completions))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: ChatRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return error_response(&ProxyError::decode(e.to_string())),
    };

    info!(
        model = %req.model,
        streaming = req.stream,
        messages = req.messages.len(),
        "Request"
    );

    let prepared = match proxy::prepare(&req, state.config.models.policy) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };

    let mut response = if req.stream {
        handle_streaming(&state, &prepared.converse).await
    } else {
        handle_non_streaming(&state, &prepared.converse).await
    };

    if let Some(requested) = prepared.fallback_from {
        let value = format!("{} -> {}", requested, prepared.converse.model_id);
        if let Ok(value) = HeaderValue::from_str(&value) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(MODEL_FALLBACK_HEADER), value);
        }
    }

    response
}

async fn handle_non_streaming(state: &AppState, converse: &ConverseRequest) -> Response {
    let chat = match proxy::complete(converse, state.backend.as_ref()).await {
        Ok(chat) => chat,
        Err(e) => return error_response(&e),
    };

    match serde_json::to_vec(&chat) {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(e) => error_response(&ProxyError::Json(e)),
    }
}

async fn handle_streaming(state: &AppState, converse: &ConverseRequest) -> Response {
    let frames = match proxy::open_stream(
        converse,
        state.backend.as_ref(),
        state.shutdown.child_token(),
    )
    .await
    {
        Ok(s) => s,
        Err(e) => return error_response(&e),
    };

    // An Err item aborts the chunked body so clients never see a clean end
    // after partial output.
    let events = frames.map(|item| -> Result<Event, ProxyError> {
        let frame = item?;
        Ok(Event::default().data(frame.data()?))
    });

    let mut response = Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response();
    response.headers_mut().insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}

fn error_response(err: &ProxyError) -> Response {
    let status = err.status_code();
    if status.is_server_error() {
        error!(status = status.as_u16(), "{}", err);
    } else {
        warn!(status = status.as_u16(), "{}", err);
    }
    (status, Json(ChatErrorResponse::from(err))).into_response()
}

async fn handle_home() -> &'static str {
    "Hello bedrock api proxy..."
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_models() -> Json<serde_json::Value> {
    let models: Vec<serde_json::Value> = SUPPORTED_MODELS
        .iter()
        .map(|id| {
            serde_json::json!({
                "id": id,
                "object": "model",
                "owned_by": "bedrock",
            })
        })
        .collect();

    Json(serde_json::json!({ "data": models, "object": "list" }))
}
