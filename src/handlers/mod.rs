//! Gateway event handlers.
//!
//! One consumer per event family; voice-state carries the room
//! lifecycle, channel-update carries manual rename detection. The
//! remaining families are drained by the dispatcher's discard consumer.

mod channel_update;
mod voice;

pub use channel_update::ChannelUpdateHandler;
pub use voice::VoiceStateHandler;
