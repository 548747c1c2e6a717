//! Error types for the proxy.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid request body: {message}")]
    Decode { message: String },

    #[error("Translation error: {message}")]
    Translation { message: String },

    #[error("Unsupported model '{model}'")]
    UnsupportedModel { model: String },

    #[error("Backend error{}: {message}", status_suffix(.status))]
    Backend {
        status: Option<u16>,
        message: String,
    },

    #[error("Unsupported content type in backend output: {found}")]
    UnsupportedContentType { found: String },

    #[error("Backend response is missing usage counter '{field}'")]
    MissingUsage { field: &'static str },

    #[error("Stream error: {message}")]
    Stream { message: String },

    #[error("Stream cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::Translation {
            message: msg.into(),
        }
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend {
            status: None,
            message: msg.into(),
        }
    }

    pub fn backend_status(status: u16, msg: impl Into<String>) -> Self {
        Self::Backend {
            status: Some(status),
            message: msg.into(),
        }
    }

    pub fn unsupported_content(found: impl Into<String>) -> Self {
        Self::UnsupportedContentType {
            found: found.into(),
        }
    }

    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream {
            message: msg.into(),
        }
    }

    /// HTTP status reported to the caller when this error ends a request.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Decode { .. }
            | Self::Translation { .. }
            | Self::UnsupportedModel { .. }
            | Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::Backend { .. }
            | Self::UnsupportedContentType { .. }
            | Self::MissingUsage { .. }
            | Self::Stream { .. }
            | Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::Cancelled | Self::Config { .. } | Self::Io(_) | Self::Toml(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// OpenAI-style `error.type` label for this error.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self.status_code() {
            StatusCode::BAD_REQUEST => "invalid_request_error",
            StatusCode::BAD_GATEWAY => "upstream_error",
            _ => "api_error",
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, ProxyError>;
