//! Channel-agnostic reply pipeline.
//!
//! The Discord adapter converts gateway events into [`ChannelMessage`]s,
//! wraps the channel in a [`ReplySurface`] and hands both to
//! [`Responder::handle`]. Everything else happens here.

pub mod context;
pub mod message;
pub mod process;
pub mod surface;
pub mod trigger;

pub use context::ContextAssembler;
pub use message::{BotIdentity, ChannelMessage, IncomingMessage};
pub use process::{CycleFailure, CycleOutcome, Responder, ResponderSettings};
pub use surface::{DeliveryError, ReplySurface, SentMessage};
pub use trigger::{
    FixedRandom, IgnoreReason, RandomSource, ThreadRandom, TriggerDecision, TriggerEvaluator,
    TriggerKind,
};
