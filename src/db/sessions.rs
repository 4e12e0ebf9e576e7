//! Session repository for database queries.
//!
//! One `voice_sessions` row per contiguous presence of a user in a room.
//! The partial unique index on `(user_id, guild_id) WHERE left_at IS NULL`
//! enforces the at-most-one-active invariant at the store level.

use super::{DbError, duration_sec, from_millis, is_unique_violation, to_millis};
use crate::platform::{ChannelId, GuildId, UserId};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// A voice session row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: i64,
    pub user_id: UserId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub channel_name: String,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub duration_sec: Option<i64>,
}

type SessionRow = (i64, i64, i64, i64, String, i64, Option<i64>, Option<i64>);

fn session_from_row(row: SessionRow) -> Session {
    let (id, user_id, guild_id, channel_id, channel_name, joined, left, duration) = row;
    Session {
        id,
        user_id: UserId(user_id as u64),
        guild_id: GuildId(guild_id as u64),
        channel_id: ChannelId(channel_id as u64),
        channel_name,
        joined_at: from_millis(joined),
        left_at: left.map(from_millis),
        duration_sec: duration,
    }
}

const SESSION_COLUMNS: &str =
    "id, user_id, guild_id, channel_id, channel_name, joined_at, left_at, duration_sec";

/// Repository for session operations.
pub struct SessionRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SessionRepository<'a> {
    /// Create a new session repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a session for `(user, guild)` in `channel`.
    ///
    /// Any other open session for the pair is first closed at `joined_at`
    /// with its duration computed, then the new row is inserted, all in
    /// one transaction. A racing insert surfaces as [`DbError::Conflict`].
    pub async fn open_session(
        &self,
        user: UserId,
        guild: GuildId,
        channel: ChannelId,
        channel_name: &str,
        joined_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        if channel_name.is_empty() {
            return Err(DbError::Corrupt("empty channel name".to_string()));
        }

        let at_ms = to_millis(joined_at);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE voice_sessions
            SET left_at = ?1,
                duration_sec = MAX(0, (?1 - joined_at) / 1000)
            WHERE user_id = ?2 AND guild_id = ?3 AND left_at IS NULL AND channel_id != ?4
            "#,
        )
        .bind(at_ms)
        .bind(user.0 as i64)
        .bind(guild.0 as i64)
        .bind(channel.0 as i64)
        .execute(&mut *tx)
        .await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO voice_sessions (user_id, guild_id, channel_id, channel_name, joined_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.0 as i64)
        .bind(guild.0 as i64)
        .bind(channel.0 as i64)
        .bind(channel_name)
        .bind(at_ms)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => Err(DbError::Conflict {
                user_id: user.0,
                guild_id: guild.0,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Close the open session for `user` in `channel`, if any.
    ///
    /// Idempotent: closing an already-closed session is a no-op.
    pub async fn close_session(
        &self,
        user: UserId,
        channel: ChannelId,
        left_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE voice_sessions
            SET left_at = ?1,
                duration_sec = MAX(0, (?1 - joined_at) / 1000)
            WHERE user_id = ?2 AND channel_id = ?3 AND left_at IS NULL
            "#,
        )
        .bind(to_millis(left_at))
        .bind(user.0 as i64)
        .bind(channel.0 as i64)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// The open session for `(user, guild)`, if any.
    pub async fn open_session_for_user(
        &self,
        user: UserId,
        guild: GuildId,
    ) -> Result<Option<Session>, DbError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM voice_sessions \
             WHERE user_id = ? AND guild_id = ? AND left_at IS NULL"
        ))
        .bind(user.0 as i64)
        .bind(guild.0 as i64)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(session_from_row))
    }

    /// All open sessions in a channel, oldest join first.
    pub async fn active_sessions_in_channel(
        &self,
        channel: ChannelId,
    ) -> Result<Vec<Session>, DbError> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM voice_sessions \
             WHERE channel_id = ? AND left_at IS NULL \
             ORDER BY joined_at ASC, user_id ASC"
        ))
        .bind(channel.0 as i64)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(session_from_row).collect())
    }

    /// Every open session in the store.
    pub async fn all_active_sessions(&self) -> Result<Vec<Session>, DbError> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM voice_sessions WHERE left_at IS NULL"
        ))
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(session_from_row).collect())
    }

    /// Count of open sessions in a channel.
    pub async fn active_members_count(&self, channel: ChannelId) -> Result<i64, DbError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM voice_sessions WHERE channel_id = ? AND left_at IS NULL",
        )
        .bind(channel.0 as i64)
        .fetch_one(self.pool)
        .await?;

        Ok(count)
    }

    /// Close every open session in the guild at `left_at`.
    ///
    /// Used during shutdown and returns the number of rows closed.
    pub async fn close_all_active(
        &self,
        guild: GuildId,
        left_at: DateTime<Utc>,
    ) -> Result<u64, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE voice_sessions
            SET left_at = ?1,
                duration_sec = MAX(0, (?1 - joined_at) / 1000)
            WHERE guild_id = ?2 AND left_at IS NULL
            "#,
        )
        .bind(to_millis(left_at))
        .bind(guild.0 as i64)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Close duplicate open sessions, keeping the most recent join per
    /// (user, channel). Returns the number of rows closed.
    ///
    /// Duplicates can only appear through direct store tampering; the
    /// partial index prevents them in normal operation.
    pub async fn cleanup_duplicate_active(
        &self,
        guild: GuildId,
        now: DateTime<Utc>,
    ) -> Result<u64, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE voice_sessions
            SET left_at = ?1,
                duration_sec = MAX(0, (?1 - joined_at) / 1000)
            WHERE guild_id = ?2 AND left_at IS NULL AND id NOT IN (
                SELECT id FROM voice_sessions s
                WHERE s.guild_id = ?2 AND s.left_at IS NULL
                  AND s.id = (
                    SELECT s2.id FROM voice_sessions s2
                    WHERE s2.user_id = s.user_id AND s2.channel_id = s.channel_id
                      AND s2.guild_id = ?2 AND s2.left_at IS NULL
                    ORDER BY s2.joined_at DESC, s2.id DESC
                    LIMIT 1
                  )
            )
            "#,
        )
        .bind(to_millis(now))
        .bind(guild.0 as i64)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Re-derive the open-session set of a channel from the platform's
    /// member list: open a session for each member missing one, close
    /// each open session whose user is absent.
    ///
    /// Returns `(opened, closed)` counts.
    pub async fn sync_channel_active_users(
        &self,
        guild: GuildId,
        channel: ChannelId,
        channel_name: &str,
        live_members: &[UserId],
        now: DateTime<Utc>,
    ) -> Result<(u64, u64), DbError> {
        let open = self.active_sessions_in_channel(channel).await?;

        let mut closed = 0;
        for session in &open {
            if !live_members.contains(&session.user_id) {
                self.close_session(session.user_id, channel, now).await?;
                closed += 1;
            }
        }

        let mut opened = 0;
        for user in live_members {
            if open.iter().any(|s| s.user_id == *user) {
                continue;
            }
            match self
                .open_session(*user, guild, channel, channel_name, now)
                .await
            {
                Ok(()) => opened += 1,
                // A concurrent JOIN handler won the race.
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
        }

        Ok((opened, closed))
    }
}
