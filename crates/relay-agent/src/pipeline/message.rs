//! Channel-neutral views of chat messages.
//!
//! Adapters convert their library types into these so the pipeline can be
//! driven by fakes in tests.

/// A message as seen in a channel, either the one that just arrived or one
/// fetched from history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub id: u64,
    pub author_id: u64,
    pub author_is_bot: bool,
    /// Nickname if known, otherwise global name, otherwise account name.
    pub display_name: String,
    pub content: String,
    /// User ids explicitly mentioned in the message.
    pub mentions: Vec<u64>,
}

/// The message that triggered an event.
pub type IncomingMessage = ChannelMessage;

impl ChannelMessage {
    pub fn mentions_user(&self, user_id: u64) -> bool {
        self.mentions.contains(&user_id)
    }
}

/// Who the bot is on the gateway, captured from the ready event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: u64,
    pub name: String,
}

/// Remove `<@id>` and `<@!id>` tokens that reference `user_id`.
pub fn strip_mentions_of(text: &str, user_id: u64) -> String {
    text.replace(&format!("<@{user_id}>"), "")
        .replace(&format!("<@!{user_id}>"), "")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_both_mention_forms() {
        assert_eq!(strip_mentions_of("<@42> hello <@!42>", 42), "hello");
    }

    #[test]
    fn keeps_mentions_of_other_users() {
        assert_eq!(strip_mentions_of("<@42> ask <@7>", 42), "ask <@7>");
    }

    #[test]
    fn mention_only_message_becomes_empty() {
        assert_eq!(strip_mentions_of("  <@42>  ", 42), "");
    }
}
