//! Cache record shapes.
//!
//! Every record is serialised inside a versioned envelope; anything that
//! fails to round-trip is deleted on read. The call state is a cache-only
//! shadow of the live-applied subset of owner preferences; the store row
//! stays authoritative.

use crate::platform::{ChannelId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Recorded owner of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerEntry {
    pub user_id: UserId,
    pub owned_since: DateTime<Utc>,
}

/// Live-applied moderation state of one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallState {
    pub channel_id: ChannelId,
    pub current_owner: Option<UserId>,
    pub muted_users: Vec<UserId>,
    pub deafened_users: Vec<UserId>,
    pub kicked_users: Vec<UserId>,
    pub last_updated: DateTime<Utc>,
}

impl CallState {
    pub fn fresh(channel_id: ChannelId, owner: Option<UserId>, now: DateTime<Utc>) -> Self {
        Self {
            channel_id,
            current_owner: owner,
            muted_users: Vec::new(),
            deafened_users: Vec::new(),
            kicked_users: Vec::new(),
            last_updated: now,
        }
    }
}

/// One member of a room, with their observed join time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMember {
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
}

/// Fixed rate-limit window for one (user, action).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindow {
    pub count: u32,
    pub window_start: DateTime<Utc>,
}

/// A single coup vote. Votes are implicit "yes".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoupVote {
    pub voter_id: UserId,
    pub at: DateTime<Utc>,
}

/// An in-flight coup against a room owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoupSession {
    pub target_user_id: UserId,
    pub votes: Vec<CoupVote>,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CoupSession {
    pub fn has_voted(&self, user: UserId) -> bool {
        self.votes.iter().any(|v| v.voter_id == user)
    }
}
