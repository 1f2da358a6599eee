pub mod config;
pub mod context;
pub mod events;
pub mod message;
pub mod skills;
pub mod types;

pub use config::Config;
pub use context::Context;
pub use message::Message;
pub use types::*;
