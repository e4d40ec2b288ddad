use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use relay_agent::{OpenAiProvider, Responder};
use relay_core::RelayConfig;
use relay_discord::DiscordAdapter;

mod app;
mod http;

/// Discord chat relay backed by an OpenAI-compatible completion API.
#[derive(Parser, Debug)]
#[command(name = "relay", version, about)]
struct Cli {
    /// Path to the TOML config file (defaults to ./relay.toml).
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "relay_gateway=info,relay_agent=info,relay_discord=info,tower_http=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    let config = match RelayConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!(code = e.code(), error = %e, "config invalid, refusing to start");
            return Err(e.into());
        }
    };

    if config.trigger.keywords.is_empty() {
        warn!("no trigger keywords configured, replying to mentions only");
    }
    info!(
        model = %config.completion.model,
        max_history = config.context.max_history,
        character = %config.character.path,
        "config loaded"
    );

    let provider = Arc::new(OpenAiProvider::from_config(&config.completion));
    let responder = Arc::new(Responder::from_config(&config, provider));

    let ip: IpAddr = config
        .health
        .bind
        .parse()
        .with_context(|| format!("invalid health bind address {:?}", config.health.bind))?;
    let addr = SocketAddr::new(ip, config.health.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind health server on {addr}"))?;
    info!("health server listening on {}", addr);

    let router = app::build_router(Arc::new(app::AppState::new(
        config.completion.model.clone(),
    )));
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!(error = %e, "health server stopped");
        }
    });

    let adapter = DiscordAdapter::new(&config.discord.bot_token, responder)?;
    info!("Discord bot starting");
    if let Err(e) = adapter.run().await {
        error!(error = %e, "Discord adapter stopped");
        return Err(e.into());
    }
    Ok(())
}
