//! Platform-facing data types.
//!
//! Identifier newtypes and the record shapes exchanged with the chat
//! platform client. The client itself lives behind the [`Platform`]
//! trait in this module's parent.
//!
//! [`Platform`]: super::Platform

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A platform user id (snowflake).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

/// A platform guild (realm) id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuildId(pub u64);

/// A platform channel (room) id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

/// A platform role id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Channel permission bits.
///
/// Only the rights the control plane grants or inspects are named. The
/// raw value round-trips unchanged so unknown platform bits survive
/// overwrite cloning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(pub u64);

impl PermissionSet {
    pub const VIEW_CHANNEL: PermissionSet = PermissionSet(1 << 0);
    pub const CONNECT: PermissionSet = PermissionSet(1 << 1);
    pub const SPEAK: PermissionSet = PermissionSet(1 << 2);
    pub const VOICE_ACTIVITY: PermissionSet = PermissionSet(1 << 3);
    pub const PRIORITY_SPEAKER: PermissionSet = PermissionSet(1 << 4);
    pub const STREAM: PermissionSet = PermissionSet(1 << 5);
    pub const CREATE_INVITE: PermissionSet = PermissionSet(1 << 6);
    pub const MANAGE_CHANNEL: PermissionSet = PermissionSet(1 << 7);

    pub const fn empty() -> Self {
        PermissionSet(0)
    }

    pub const fn union(self, other: PermissionSet) -> Self {
        PermissionSet(self.0 | other.0)
    }

    pub const fn contains(self, other: PermissionSet) -> bool {
        self.0 & other.0 == other.0
    }

    /// The channel-scoped rights granted to a room owner.
    ///
    /// Realm-wide rights (move/mute/deafen members, manage roles) are
    /// never part of this set.
    pub const fn owner_grant() -> Self {
        Self::MANAGE_CHANNEL
            .union(Self::CREATE_INVITE)
            .union(Self::CONNECT)
            .union(Self::SPEAK)
            .union(Self::VOICE_ACTIVITY)
            .union(Self::PRIORITY_SPEAKER)
            .union(Self::STREAM)
    }
}

/// Target of a permission overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OverwriteTarget {
    User(UserId),
    Role(RoleId),
}

/// A single permission overwrite on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOverwrite {
    pub target: OverwriteTarget,
    pub allow: PermissionSet,
    pub deny: PermissionSet,
}

impl PermissionOverwrite {
    /// The overwrite seeded for a room owner.
    pub fn owner(user: UserId) -> Self {
        Self {
            target: OverwriteTarget::User(user),
            allow: PermissionSet::owner_grant(),
            deny: PermissionSet::empty(),
        }
    }
}

/// Live description of a voice channel as the platform reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub guild_id: GuildId,
    pub name: String,
    pub position: i32,
    pub user_limit: Option<u32>,
    pub overwrites: Vec<PermissionOverwrite>,
}

impl ChannelInfo {
    /// Whether the channel denies a right to the everyone role.
    pub fn denies_everyone(&self, right: PermissionSet) -> bool {
        self.overwrites.iter().any(|ow| {
            matches!(ow.target, OverwriteTarget::Role(_)) && ow.deny.contains(right)
        })
    }
}

/// A guild member as seen at event/query time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user_id: UserId,
    pub display_name: String,
    pub is_bot: bool,
    /// Holds the realm Administrator right.
    pub is_admin: bool,
}

/// Specification for creating a voice channel.
#[derive(Debug, Clone)]
pub struct CreateChannelSpec {
    pub guild_id: GuildId,
    pub name: String,
    pub position: i32,
    pub user_limit: Option<u32>,
    pub overwrites: Vec<PermissionOverwrite>,
}

/// An embed card sent into a text-capable channel.
#[derive(Debug, Clone, Default)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub fields: Vec<(String, String)>,
}

/// Audit log actions the control plane consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    ChannelUpdate,
}

/// A single audit log entry.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub executor: UserId,
    pub target: Option<ChannelId>,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_grant_is_channel_scoped() {
        let grant = PermissionSet::owner_grant();
        assert!(grant.contains(PermissionSet::MANAGE_CHANNEL));
        assert!(grant.contains(PermissionSet::CONNECT));
        assert!(grant.contains(PermissionSet::SPEAK));
        assert!(grant.contains(PermissionSet::PRIORITY_SPEAKER));
        // Nothing outside the named channel-scoped bits.
        assert_eq!(grant.0 & !0xff, 0);
    }

    #[test]
    fn denies_everyone_matches_role_overwrites_only() {
        let info = ChannelInfo {
            id: ChannelId(1),
            guild_id: GuildId(1),
            name: "Lobby".into(),
            position: 3,
            user_limit: None,
            overwrites: vec![PermissionOverwrite {
                target: OverwriteTarget::User(UserId(9)),
                allow: PermissionSet::empty(),
                deny: PermissionSet::CONNECT,
            }],
        };
        assert!(!info.denies_everyone(PermissionSet::CONNECT));

        let locked = ChannelInfo {
            overwrites: vec![PermissionOverwrite {
                target: OverwriteTarget::Role(RoleId(1)),
                allow: PermissionSet::empty(),
                deny: PermissionSet::CONNECT,
            }],
            ..info
        };
        assert!(locked.denies_everyone(PermissionSet::CONNECT));
    }
}
