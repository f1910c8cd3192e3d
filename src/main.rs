use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use web_pilot::llm::OpenAiClient;
use web_pilot::server::{self, AppState};
use web_pilot::{AgentConfig, BrowserOptions, Orchestrator, SessionManager};

#[derive(Parser, Debug)]
#[command(name = "web-pilot", version, about = "Agentic browser automation server")]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

    /// Show the browser window instead of running headless
    #[arg(long)]
    headed: bool,

    /// Launch Chrome at startup instead of on the first request
    #[arg(long)]
    eager: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "web_pilot=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = AgentConfig::from_env();
    if cli.headed {
        config.headless = false;
    }
    if config.api_key.is_none() {
        warn!("OPENAI_API_KEY not set; requests must carry their own apiKey or planning will fall back");
    }

    let sessions = Arc::new(SessionManager::new(BrowserOptions::from(&config)));
    if cli.eager {
        sessions.init().await?;
    }
    let client = Arc::new(OpenAiClient::new(&config)?);
    let orchestrator = Arc::new(Orchestrator::new(sessions.clone(), client, &config));

    let app = server::router(AppState {
        sessions: sessions.clone(),
        orchestrator,
    });

    let listener = tokio::net::TcpListener::bind(cli.bind).await?;
    info!("web-pilot listening on http://{}", cli.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    sessions.close_all().await?;
    Ok(())
}
