pub mod adapter;
pub mod error;
pub mod handler;
pub mod send;
pub mod surface;

pub use adapter::DiscordAdapter;
pub use error::DiscordError;
pub use surface::DiscordSurface;
