//! Cache key patterns.
//!
//! Every key the core writes lives in one of these namespaces; the
//! startup sweep iterates [`NAMESPACES`] to find junk left by earlier
//! deployments.

use crate::platform::{ChannelId, GuildId, UserId};

/// Namespace prefixes, used by the malformed-entry sweep.
pub const NAMESPACES: [&str; 6] = [
    "channel_owner:",
    "user_prefs:",
    "call_state:",
    "rate_limit:",
    "coup:",
    "channel_members:",
];

pub fn channel_owner(channel: ChannelId) -> String {
    format!("channel_owner:{channel}")
}

pub fn user_prefs(user: UserId, guild: GuildId) -> String {
    format!("user_prefs:{user}:{guild}")
}

pub fn call_state(channel: ChannelId) -> String {
    format!("call_state:{channel}")
}

pub fn rate_limit(user: UserId, action: &str) -> String {
    format!("rate_limit:{user}:{action}")
}

pub fn coup(channel: ChannelId) -> String {
    format!("coup:{channel}")
}

pub fn channel_members(channel: ChannelId) -> String {
    format!("channel_members:{channel}")
}
