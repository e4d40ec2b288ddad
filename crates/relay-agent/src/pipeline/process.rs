//! One response cycle: placeholder → context → completion → edit.
//!
//! ```text
//! Pending ──completion ok + edit ok──▶ Sent
//!    │
//!    └──any failure──▶ apology (edit, else new message) ──▶ Failed
//! ```
//!
//! Every external call is awaited in order; nothing is retried and nothing is
//! returned as an error to the gateway event handler.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use relay_core::config::RelayConfig;

use crate::prompt::CharacterLoader;
use crate::provider::{ChatRequest, LlmProvider, ProviderError};

use super::context::ContextAssembler;
use super::message::{BotIdentity, ChannelMessage};
use super::surface::{DeliveryError, ReplySurface, SentMessage};
use super::trigger::{RandomSource, ThreadRandom, TriggerDecision, TriggerEvaluator, TriggerKind};

/// Fixed per-process settings of the response cycle.
#[derive(Debug, Clone)]
pub struct ResponderSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_history: usize,
    pub timeout: Duration,
    pub placeholder: String,
    pub apology: String,
}

impl ResponderSettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            model: config.completion.model.clone(),
            temperature: config.completion.temperature,
            max_tokens: config.completion.max_tokens,
            max_history: config.context.max_history,
            timeout: Duration::from_secs(config.completion.timeout_secs),
            placeholder: config.messages.placeholder.clone(),
            apology: config.messages.apology.clone(),
        }
    }
}

/// How a response cycle ended.
#[derive(Debug)]
pub enum CycleOutcome {
    Sent,
    Failed(CycleFailure),
}

impl CycleOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, CycleOutcome::Sent)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CycleFailure {
    /// The placeholder could not be published; no completion was requested.
    #[error("placeholder failed: {0}")]
    Placeholder(DeliveryError),
    #[error("completion failed: {0}")]
    Completion(ProviderError),
    /// The answer was produced but could not be written into the placeholder.
    #[error("delivery failed: {0}")]
    Delivery(DeliveryError),
}

/// Everything a response cycle needs, constructed once and shared across
/// gateway events.
pub struct Responder {
    provider: Arc<dyn LlmProvider>,
    trigger: TriggerEvaluator,
    character: CharacterLoader,
    settings: ResponderSettings,
}

impl Responder {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        trigger: TriggerEvaluator,
        character: CharacterLoader,
        settings: ResponderSettings,
    ) -> Self {
        Self {
            provider,
            trigger,
            character,
            settings,
        }
    }

    /// Build from validated config with an explicit random source.
    pub fn with_random(
        config: &RelayConfig,
        provider: Arc<dyn LlmProvider>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self::new(
            provider,
            TriggerEvaluator::new(&config.trigger, random),
            CharacterLoader::new(&config.character.path),
            ResponderSettings::from_config(config),
        )
    }

    /// Build from validated config using the thread RNG.
    pub fn from_config(config: &RelayConfig, provider: Arc<dyn LlmProvider>) -> Self {
        Self::with_random(config, provider, Arc::new(ThreadRandom))
    }

    pub fn evaluate(&self, msg: &ChannelMessage, bot: &BotIdentity) -> TriggerDecision {
        self.trigger.evaluate(msg, bot.id)
    }

    /// Entry point for a gateway "message created" event.
    ///
    /// Returns `None` when the trigger decided not to reply.
    pub async fn handle(
        &self,
        surface: &dyn ReplySurface,
        msg: &ChannelMessage,
        bot: &BotIdentity,
    ) -> Option<CycleOutcome> {
        match self.evaluate(msg, bot) {
            TriggerDecision::Respond(kind) => Some(self.respond(surface, msg, bot, kind).await),
            TriggerDecision::Ignore(reason) => {
                tracing::trace!(message_id = msg.id, ?reason, "not replying");
                None
            }
        }
    }

    /// Run a full response cycle for a message that has already been accepted.
    pub async fn respond(
        &self,
        surface: &dyn ReplySurface,
        msg: &ChannelMessage,
        bot: &BotIdentity,
        kind: TriggerKind,
    ) -> CycleOutcome {
        info!(
            message_id = msg.id,
            author = %msg.display_name,
            bot = %bot.name,
            trigger = kind.as_str(),
            "starting reply"
        );

        let placeholder = match surface.send(&self.settings.placeholder).await {
            Ok(sent) => sent,
            Err(e) => {
                warn!(error = %e, message_id = msg.id, "placeholder send failed");
                return CycleOutcome::Failed(CycleFailure::Placeholder(e));
            }
        };

        let assembler =
            ContextAssembler::new(bot, &self.settings.placeholder, &self.settings.apology);
        let turns = match surface.recent_messages(self.settings.max_history).await {
            Ok(history) => assembler.assemble(history, msg),
            Err(e) => {
                warn!(error = %e, "history fetch failed, replying to the message alone");
                assembler.assemble(Vec::new(), msg)
            }
        };

        let request = ChatRequest {
            model: self.settings.model.clone(),
            system: self.character.load().system_text(kind),
            messages: turns,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        let content = match self.complete(&request).await {
            Ok(content) => content,
            Err(e) => {
                warn!(
                    error = %e,
                    kind = e.kind(),
                    provider = self.provider.name(),
                    "completion failed"
                );
                self.apologize(surface, placeholder).await;
                return CycleOutcome::Failed(CycleFailure::Completion(e));
            }
        };

        match surface.edit(placeholder, &content).await {
            Ok(()) => {
                info!(message_id = msg.id, chars = content.chars().count(), "reply sent");
                CycleOutcome::Sent
            }
            Err(e) if e.is_partial() => {
                // The placeholder holds the start of the answer; keep it.
                warn!(error = %e, "reply truncated, appending apology");
                if let Err(send_err) = surface.send(&self.settings.apology).await {
                    error!(error = %send_err, "apology could not be delivered");
                }
                CycleOutcome::Failed(CycleFailure::Delivery(e))
            }
            Err(e) => {
                warn!(error = %e, "editing placeholder with reply failed");
                self.apologize(surface, placeholder).await;
                CycleOutcome::Failed(CycleFailure::Delivery(e))
            }
        }
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, ProviderError> {
        let secs = self.settings.timeout.as_secs();
        let resp = tokio::time::timeout(self.settings.timeout, self.provider.send(request))
            .await
            .map_err(|_| ProviderError::Timeout { secs })??;

        if resp.content.trim().is_empty() {
            return Err(ProviderError::EmptyCompletion);
        }

        tracing::debug!(
            model = %resp.model,
            tokens_in = resp.tokens_in,
            tokens_out = resp.tokens_out,
            stop_reason = %resp.stop_reason,
            "completion received"
        );
        Ok(resp.content)
    }

    /// Best effort: edit the placeholder, else post a new message, else log.
    async fn apologize(&self, surface: &dyn ReplySurface, placeholder: SentMessage) {
        let Err(edit_err) = surface.edit(placeholder, &self.settings.apology).await else {
            return;
        };
        warn!(error = %edit_err, "apology edit failed, sending a new message");

        if let Err(e) = surface.send(&self.settings.apology).await {
            error!(error = %e, "apology could not be delivered");
        }
    }
}
