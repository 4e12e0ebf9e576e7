//! Gateway event records.
//!
//! Raw platform callbacks are converted into these typed records before
//! they cross into the dispatcher. Handlers never see library types.

use super::types::{ChannelId, ChannelInfo, GuildId, UserId};
use chrono::{DateTime, Utc};

/// A voice-state update as delivered by the gateway.
///
/// `from`/`to` are the previous and next channels; either may be absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceTransition {
    pub user_id: UserId,
    pub guild_id: GuildId,
    pub from: Option<ChannelId>,
    pub to: Option<ChannelId>,
    pub at: DateTime<Utc>,
}

/// Classified form of a [`VoiceTransition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Join(ChannelId),
    Leave(ChannelId),
    Move { from: ChannelId, to: ChannelId },
    /// Same-channel updates: mute/deafen/video toggles.
    Ignored,
}

impl VoiceTransition {
    pub fn classify(&self) -> Transition {
        match (self.from, self.to) {
            (None, Some(to)) => Transition::Join(to),
            (Some(from), None) => Transition::Leave(from),
            (Some(from), Some(to)) if from != to => Transition::Move { from, to },
            _ => Transition::Ignored,
        }
    }
}

/// Typed gateway events, one variant per dispatcher family.
///
/// Message, reaction and member records carry only what ordering needs;
/// audit tracking of their payloads is a separate concern.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    VoiceState(VoiceTransition),
    ChannelUpdate {
        channel: ChannelInfo,
        at: DateTime<Utc>,
    },
    Message {
        guild_id: GuildId,
        channel_id: ChannelId,
        author_id: UserId,
        at: DateTime<Utc>,
    },
    Reaction {
        guild_id: GuildId,
        channel_id: ChannelId,
        user_id: UserId,
        at: DateTime<Utc>,
    },
    MemberUpdate {
        guild_id: GuildId,
        user_id: UserId,
        at: DateTime<Utc>,
    },
}

/// Dispatcher families. Ordering holds within a family, never across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventFamily {
    Voice,
    Channel,
    Message,
    Reaction,
    Member,
}

impl EventFamily {
    pub const ALL: [EventFamily; 5] = [
        EventFamily::Voice,
        EventFamily::Channel,
        EventFamily::Message,
        EventFamily::Reaction,
        EventFamily::Member,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EventFamily::Voice => "voice",
            EventFamily::Channel => "channel",
            EventFamily::Message => "message",
            EventFamily::Reaction => "reaction",
            EventFamily::Member => "member",
        }
    }
}

impl GatewayEvent {
    pub fn family(&self) -> EventFamily {
        match self {
            GatewayEvent::VoiceState(_) => EventFamily::Voice,
            GatewayEvent::ChannelUpdate { .. } => EventFamily::Channel,
            GatewayEvent::Message { .. } => EventFamily::Message,
            GatewayEvent::Reaction { .. } => EventFamily::Reaction,
            GatewayEvent::MemberUpdate { .. } => EventFamily::Member,
        }
    }
}
