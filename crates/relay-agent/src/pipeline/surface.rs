use async_trait::async_trait;

use super::message::ChannelMessage;

/// Handle to a message the bot has published and may edit later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SentMessage(pub u64);

/// Failures talking to the chat gateway itself.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("send failed: {0}")]
    Send(String),

    #[error("edit failed: {0}")]
    Edit(String),

    #[error("history fetch failed: {0}")]
    History(String),

    /// The edit landed but a follow-up chunk of a long reply did not.
    #[error("follow-up chunk failed: {0}")]
    Overflow(String),
}

impl DeliveryError {
    /// True when the edited message already shows part of the answer.
    pub fn is_partial(&self) -> bool {
        matches!(self, DeliveryError::Overflow(_))
    }
}

/// The channel a response cycle writes to.
///
/// Implemented by the Discord adapter for a single channel, and by fakes in
/// tests. All calls are awaited strictly in order by the pipeline.
#[async_trait]
pub trait ReplySurface: Send + Sync {
    /// Up to `limit` most recent messages, newest first (gateway order).
    async fn recent_messages(&self, limit: usize) -> Result<Vec<ChannelMessage>, DeliveryError>;

    /// Publish a new message.
    async fn send(&self, text: &str) -> Result<SentMessage, DeliveryError>;

    /// Replace the text of a message previously returned by [`send`](Self::send).
    ///
    /// Text over the gateway's length limit may overflow into follow-up
    /// messages; a failure among those is reported as
    /// [`DeliveryError::Overflow`].
    async fn edit(&self, message: SentMessage, text: &str) -> Result<(), DeliveryError>;
}
