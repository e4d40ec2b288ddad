//! Turns recent channel history into model input.
//!
//! History arrives newest-first from the gateway and leaves oldest-first.
//! The bot's own messages become assistant turns, except the placeholder and
//! apology texts, which are never fed back to the model. Everyone else
//! becomes a `"name: text"` user turn with mentions of the bot removed.

use crate::provider::Message;

use super::message::{strip_mentions_of, BotIdentity, ChannelMessage};

pub struct ContextAssembler<'a> {
    bot: &'a BotIdentity,
    placeholder: &'a str,
    apology: &'a str,
}

impl<'a> ContextAssembler<'a> {
    pub fn new(bot: &'a BotIdentity, placeholder: &'a str, apology: &'a str) -> Self {
        Self {
            bot,
            placeholder,
            apology,
        }
    }

    /// Build the conversation turns for one reply.
    ///
    /// `history` is in gateway order (newest first). If `trigger` is not in
    /// it (fetch failed, or the window raced past it) it is appended as the
    /// newest user turn. The trigger always yields a turn, even a bare ping.
    pub fn assemble(&self, history: Vec<ChannelMessage>, trigger: &ChannelMessage) -> Vec<Message> {
        let includes_trigger = history.iter().any(|m| m.id == trigger.id);

        let mut turns: Vec<Message> = history
            .iter()
            .rev()
            .filter_map(|m| {
                if m.id == trigger.id {
                    Some(self.trigger_turn(m))
                } else {
                    self.to_turn(m)
                }
            })
            .collect();

        if !includes_trigger {
            turns.push(self.trigger_turn(trigger));
        }

        turns
    }

    fn trigger_turn(&self, msg: &ChannelMessage) -> Message {
        let text = strip_mentions_of(&msg.content, self.bot.id);
        if text.is_empty() {
            Message::user(format!("{}:", msg.display_name))
        } else {
            Message::user(format!("{}: {}", msg.display_name, text))
        }
    }

    fn to_turn(&self, msg: &ChannelMessage) -> Option<Message> {
        if msg.author_id == self.bot.id {
            let text = msg.content.trim();
            if text.is_empty() || text == self.placeholder.trim() || text == self.apology.trim() {
                return None;
            }
            return Some(Message::assistant(text));
        }

        let text = strip_mentions_of(&msg.content, self.bot.id);
        if text.is_empty() {
            return None;
        }
        Some(Message::user(format!("{}: {}", msg.display_name, text)))
    }
}
