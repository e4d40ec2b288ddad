//! [`ReplySurface`] over a single Discord channel, via the REST client.

use std::sync::Arc;

use async_trait::async_trait;
use serenity::builder::{EditMessage, GetMessages};
use serenity::http::Http;
use serenity::model::channel::Message;
use serenity::model::id::{ChannelId, MessageId};
use tracing::debug;

use relay_agent::pipeline::{ChannelMessage, DeliveryError, ReplySurface, SentMessage};

use crate::send::split_chunks;

/// Discord serves at most this many messages per history request.
const HISTORY_PAGE_MAX: usize = 100;

pub struct DiscordSurface {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl DiscordSurface {
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Self {
        Self { http, channel_id }
    }
}

#[async_trait]
impl ReplySurface for DiscordSurface {
    async fn recent_messages(&self, limit: usize) -> Result<Vec<ChannelMessage>, DeliveryError> {
        let limit = limit.clamp(1, HISTORY_PAGE_MAX) as u8;
        let messages = self
            .channel_id
            .messages(self.http.as_ref(), GetMessages::new().limit(limit))
            .await
            .map_err(|e| DeliveryError::History(e.to_string()))?;

        debug!(channel_id = %self.channel_id, count = messages.len(), "fetched history");
        Ok(messages.iter().map(to_channel_message).collect())
    }

    async fn send(&self, text: &str) -> Result<SentMessage, DeliveryError> {
        let sent = self
            .channel_id
            .say(self.http.as_ref(), text)
            .await
            .map_err(|e| DeliveryError::Send(e.to_string()))?;
        Ok(SentMessage(sent.id.get()))
    }

    /// Long replies overflow into follow-up messages after the edited one.
    async fn edit(&self, message: SentMessage, text: &str) -> Result<(), DeliveryError> {
        let mut chunks = split_chunks(text).into_iter();
        let first = chunks.next().unwrap_or_default();

        self.channel_id
            .edit_message(
                self.http.as_ref(),
                MessageId::new(message.0),
                EditMessage::new().content(first),
            )
            .await
            .map_err(|e| DeliveryError::Edit(e.to_string()))?;

        for chunk in chunks {
            self.channel_id
                .say(self.http.as_ref(), chunk)
                .await
                .map_err(|e| DeliveryError::Overflow(e.to_string()))?;
        }
        Ok(())
    }
}

/// Convert a serenity message into the pipeline's view of it.
pub fn to_channel_message(msg: &Message) -> ChannelMessage {
    let nick = msg.member.as_ref().and_then(|m| m.nick.as_deref());
    ChannelMessage {
        id: msg.id.get(),
        author_id: msg.author.id.get(),
        author_is_bot: msg.author.bot,
        display_name: display_name(nick, msg.author.global_name.as_deref(), &msg.author.name),
        content: msg.content.clone(),
        mentions: msg.mentions.iter().map(|u| u.id.get()).collect(),
    }
}

/// Server nickname, else global display name, else account name.
fn display_name(nick: Option<&str>, global_name: Option<&str>, account: &str) -> String {
    [nick, global_name]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|n| !n.is_empty())
        .unwrap_or(account)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nickname_wins() {
        assert_eq!(display_name(Some("Ali"), Some("Alice"), "alice_01"), "Ali");
    }

    #[test]
    fn global_name_when_no_nickname() {
        assert_eq!(display_name(None, Some("Alice"), "alice_01"), "Alice");
    }

    #[test]
    fn account_name_as_last_resort() {
        assert_eq!(display_name(None, None, "alice_01"), "alice_01");
        assert_eq!(display_name(Some("  "), None, "alice_01"), "alice_01");
    }
}
