//! Start a bedrock-proxy server programmatically.
//!
//! Usage:
//!   export AWS_BEARER_TOKEN_BEDROCK=your_key
//!   cargo run --example basic_proxy

use bedrock_proxy::{build_router, AppState, BedrockClient, ProxyConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = ProxyConfig::find_and_load(None)?;
    let backend = BedrockClient::from_config(&config)?;

    println!("Region:   {}", config.effective_region());
    println!("Endpoint: {}", backend.endpoint());

    let port = config.port;
    let state = Arc::new(AppState {
        config,
        backend: Arc::new(backend),
        shutdown: CancellationToken::new(),
    });

    let app = build_router(state);
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!("Listening on http://{}", addr);
    println!();
    println!("  OPENAI_BASE_URL=http://localhost:{}/v1", port);

    axum::serve(listener, app).await?;
    Ok(())
}
