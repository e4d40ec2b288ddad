use std::sync::{Arc, OnceLock};

use serenity::async_trait;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::prelude::{Context, EventHandler};
use tracing::{debug, info, warn};

use relay_agent::pipeline::{BotIdentity, CycleOutcome};
use relay_agent::Responder;

use crate::surface::{to_channel_message, DiscordSurface};

/// Serenity event handler wired to the relay pipeline.
pub struct DiscordHandler {
    pub responder: Arc<Responder>,
    pub bot: OnceLock<BotIdentity>,
}

impl DiscordHandler {
    pub fn new(responder: Arc<Responder>) -> Self {
        Self {
            responder,
            bot: OnceLock::new(),
        }
    }
}

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        let identity = BotIdentity {
            id: ready.user.id.get(),
            name: ready.user.name.clone(),
        };
        // Survives reconnects: the identity never changes for one token.
        self.bot.set(identity).ok();

        info!(
            tag = %ready.user.tag(),
            guilds = ready.guilds.len(),
            "Discord bot connected"
        );
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let Some(bot) = self.bot.get().cloned() else {
            warn!(message_id = %msg.id, "message received before ready, ignoring");
            return;
        };

        let incoming = to_channel_message(&msg);
        let surface = DiscordSurface::new(Arc::clone(&ctx.http), msg.channel_id);
        let responder = Arc::clone(&self.responder);
        let channel_id = msg.channel_id;

        tokio::spawn(async move {
            match responder.handle(&surface, &incoming, &bot).await {
                None => {}
                Some(CycleOutcome::Sent) => {
                    debug!(%channel_id, message_id = incoming.id, "reply delivered");
                }
                Some(CycleOutcome::Failed(failure)) => {
                    warn!(%channel_id, message_id = incoming.id, error = %failure, "reply cycle failed");
                }
            }
        });
    }
}
