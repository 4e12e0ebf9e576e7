//! Session tracker.
//!
//! Opens and closes session rows as users join, leave and move between
//! rooms. Spawn channels and AFK rooms are never tracked; bot accounts
//! are filtered out before the tracker is reached.

use crate::config::RealmConfig;
use crate::db::{Database, DbError, retry};
use crate::platform::{ChannelId, GuildId, UserId};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Name fragments that mark a room as AFK/idle parking.
const AFK_NAME_FRAGMENTS: [&str; 3] = ["afk", "away", "idle"];

pub struct SessionTracker {
    db: Database,
    realm: RealmConfig,
}

impl SessionTracker {
    pub fn new(db: Database, realm: RealmConfig) -> Self {
        Self { db, realm }
    }

    /// Whether presence in this room is tracked at all.
    pub fn is_tracked(&self, channel: ChannelId, channel_name: &str) -> bool {
        if self.realm.is_spawn(channel) || self.realm.is_afk_id(channel) {
            return false;
        }
        let lower = channel_name.to_lowercase();
        !AFK_NAME_FRAGMENTS.iter().any(|f| lower.contains(f))
    }

    /// Open a session for a join.
    ///
    /// An open session elsewhere is closed by the store in the same
    /// transaction. A same-channel conflict means the row already exists
    /// (dropped LEAVE or redelivered JOIN) and is treated as success; the
    /// reconciler owns the repair.
    pub async fn track_join(
        &self,
        user: UserId,
        guild: GuildId,
        channel: ChannelId,
        channel_name: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        if !self.is_tracked(channel, channel_name) {
            return Ok(());
        }

        let sessions = self.db.sessions();
        match retry("open_session", || {
            sessions.open_session(user, guild, channel, channel_name, at)
        })
        .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_conflict() => {
                debug!(user_id = %user, channel_id = %channel, "Session already open");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Close the session for a leave. Idempotent.
    pub async fn track_leave(
        &self,
        user: UserId,
        channel: ChannelId,
        channel_name: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        if !self.is_tracked(channel, channel_name) {
            return Ok(());
        }

        let sessions = self.db.sessions();
        retry("close_session", || sessions.close_session(user, channel, at)).await
    }

    /// Close-then-open for a move, both sides stamped with the same `at`.
    #[allow(clippy::too_many_arguments)]
    pub async fn track_move(
        &self,
        user: UserId,
        guild: GuildId,
        from: ChannelId,
        from_name: &str,
        to: ChannelId,
        to_name: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.track_leave(user, from, from_name, at).await?;
        self.track_join(user, guild, to, to_name, at).await
    }
}
