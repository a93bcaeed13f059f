//! Command handling module.
//!
//! Processes admin commands the account owner sends in any chat.
//! Commands use the `/autopilot` prefix by default.

mod handler;
mod types;

pub use handler::CommandHandler;
pub use types::{BotCommand, CommandResult};
