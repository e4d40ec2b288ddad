use std::sync::Arc;
use std::time::Duration;

use serenity::gateway::GatewayError;
use serenity::model::gateway::GatewayIntents;
use serenity::Client;
use tracing::{error, info, warn};

use relay_agent::Responder;

use crate::error::DiscordError;
use crate::handler::DiscordHandler;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const REBUILD_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Discord channel adapter.
///
/// Wraps a serenity `Client` and drives the event loop. Dropped gateway
/// connections are re-established; a rejected token or intent set is fatal.
pub struct DiscordAdapter {
    responder: Arc<Responder>,
    token: String,
}

impl DiscordAdapter {
    pub fn new(token: &str, responder: Arc<Responder>) -> Result<Self, DiscordError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(DiscordError::NoToken);
        }
        Ok(Self {
            responder,
            token: token.to_string(),
        })
    }

    /// Guild text, guild messages, and message content (privileged).
    pub fn intents() -> GatewayIntents {
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT
    }

    /// Connect to Discord and keep reconnecting whenever the gateway drops.
    ///
    /// Returns only when Discord refuses the session outright.
    pub async fn run(self) -> Result<(), DiscordError> {
        let intents = Self::intents();
        let mut client = self.build_client(intents).await?;

        loop {
            info!("Discord: gateway connecting");

            match client.start().await {
                Err(e) if is_fatal(&e) => {
                    error!(error = %e, "Discord: login rejected");
                    return Err(DiscordError::LoginRejected(e.to_string()));
                }
                Err(e) => warn!("Discord: gateway error ({e}), reconnecting in 5s"),
                Ok(()) => info!("Discord: gateway stopped cleanly, reconnecting in 5s"),
            }

            tokio::time::sleep(RECONNECT_DELAY).await;

            client = loop {
                match self.build_client(intents).await {
                    Ok(c) => break c,
                    Err(e) => {
                        error!("Discord: reconnect failed ({e}), retrying in 30s");
                        tokio::time::sleep(REBUILD_RETRY_DELAY).await;
                    }
                }
            };
        }
    }

    async fn build_client(&self, intents: GatewayIntents) -> Result<Client, serenity::Error> {
        Client::builder(&self.token, intents)
            .event_handler(DiscordHandler::new(Arc::clone(&self.responder)))
            .await
    }
}

/// Errors no amount of reconnecting will fix.
fn is_fatal(err: &serenity::Error) -> bool {
    matches!(
        err,
        serenity::Error::Gateway(
            GatewayError::InvalidAuthentication
                | GatewayError::DisallowedGatewayIntents
                | GatewayError::InvalidGatewayIntents
        )
    )
}
