//! Moderation-history repository.
//!
//! Append-only record of owner moderation actions.

use super::{DbError, to_millis};
use crate::platform::{ChannelId, GuildId, UserId};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// Moderation actions recorded to history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModAction {
    Mute,
    Unmute,
    Deafen,
    Undeafen,
    Kick,
    Ban,
    Unban,
    RenameUser,
    Transfer,
    Coup,
}

impl ModAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModAction::Mute => "mute",
            ModAction::Unmute => "unmute",
            ModAction::Deafen => "deafen",
            ModAction::Undeafen => "undeafen",
            ModAction::Kick => "kick",
            ModAction::Ban => "ban",
            ModAction::Unban => "unban",
            ModAction::RenameUser => "rename_user",
            ModAction::Transfer => "transfer",
            ModAction::Coup => "coup",
        }
    }
}

/// One appended history entry.
#[derive(Debug, Clone)]
pub struct ModHistoryEntry {
    pub action: ModAction,
    pub target_user_id: Option<UserId>,
    pub channel_id: Option<ChannelId>,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Repository for moderation history.
pub struct ModHistoryRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ModHistoryRepository<'a> {
    /// Create a new history repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append an entry.
    pub async fn append(
        &self,
        owner: UserId,
        guild: GuildId,
        entry: ModHistoryEntry,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO mod_history (owner_id, guild_id, action, target_user_id, channel_id, reason, at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(owner.0 as i64)
        .bind(guild.0 as i64)
        .bind(entry.action.as_str())
        .bind(entry.target_user_id.map(|v| v.0 as i64))
        .bind(entry.channel_id.map(|v| v.0 as i64))
        .bind(&entry.reason)
        .bind(to_millis(entry.at))
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Count of entries recorded for an owner.
    pub async fn count_for_owner(&self, owner: UserId, guild: GuildId) -> Result<i64, DbError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM mod_history WHERE owner_id = ? AND guild_id = ?",
        )
        .bind(owner.0 as i64)
        .bind(guild.0 as i64)
        .fetch_one(self.pool)
        .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn append_and_count() {
        let db = Database::new(":memory:").await.unwrap();
        let history = db.mod_history();

        history
            .append(
                UserId(1),
                GuildId(9),
                ModHistoryEntry {
                    action: ModAction::Mute,
                    target_user_id: Some(UserId(2)),
                    channel_id: Some(ChannelId(5)),
                    reason: None,
                    at: Utc::now(),
                },
            )
            .await
            .unwrap();

        assert_eq!(history.count_for_owner(UserId(1), GuildId(9)).await.unwrap(), 1);
        assert_eq!(history.count_for_owner(UserId(2), GuildId(9)).await.unwrap(), 0);
    }
}
