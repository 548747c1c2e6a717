use bedrock_proxy::config::config_search_paths;
use bedrock_proxy::models::SUPPORTED_MODELS;
use bedrock_proxy::{build_router, AppState, BedrockClient, ProxyConfig};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "bedrock-proxy",
    about = "OpenAI-compatible chat completions proxy for Amazon Bedrock",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// AWS region (overrides config and AWS_REGION)
    #[arg(long)]
    region: Option<String>,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bedrock_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(region) = cli.region {
        config.bedrock.region = Some(region);
    }

    // Fails early when the API key variable is missing
    let backend = BedrockClient::from_config(&config)?;

    info!("╔═══════════════════════════════════════════════════════╗");
    info!("║           bedrock-proxy v{}                 ║", env!("CARGO_PKG_VERSION"));
    info!("╚═══════════════════════════════════════════════════════╝");
    info!("  Region:    {}", config.effective_region());
    info!("  Endpoint:  {}", backend.endpoint());
    info!("  Port:      {}", config.port);
    info!("  Models:    {} supported, policy {:?}", SUPPORTED_MODELS.len(), config.models.policy);

    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState {
        config: config.clone(),
        backend: Arc::new(backend),
        shutdown: shutdown.clone(),
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("");
    info!("  To use with an OpenAI client:");
    info!("    OPENAI_BASE_URL=http://localhost:{}/v1", config.port);
    info!("");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down");
            }
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
