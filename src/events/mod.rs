//! Inbound update routing.
//!
//! Updates received by each account are turned into [`ProviderUpdate`]s by
//! the Telegram layer and routed by the [`EventDispatcher`] to realtime
//! subscribers, the automation evaluator and the command handler.

mod dispatcher;
mod update;

pub use dispatcher::{COMMAND_REPLY_PRIORITY, EventDispatcher, UpdateFilter, UpdateHandler};
pub use update::{InboundEvent, MediaInfo, MessageUpdate, ProviderUpdate, RealtimeEvent};
