//! Channel repository for database queries.
//!
//! One row per tracked voice room. Rows are never deleted; `active` goes
//! false when the platform channel disappears, keeping the audit trail.

use super::{DbError, from_millis, to_millis};
use crate::platform::{ChannelId, GuildId, UserId};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// A tracked voice room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRecord {
    pub id: ChannelId,
    pub guild_id: GuildId,
    pub name: String,
    pub position: i32,
    pub is_user_room: bool,
    /// Spawn channel this room was created from, for user-rooms.
    pub spawn_id: Option<ChannelId>,
    pub owner_id: Option<UserId>,
    pub owner_since: Option<DateTime<Utc>>,
    pub previous_owner_id: Option<UserId>,
    pub active: bool,
    pub member_count: i64,
}

type RoomRow = (
    i64,
    i64,
    String,
    i32,
    bool,
    Option<i64>,
    Option<i64>,
    Option<i64>,
    Option<i64>,
    bool,
    i64,
);

fn room_from_row(row: RoomRow) -> RoomRecord {
    let (
        id,
        guild_id,
        name,
        position,
        is_user_room,
        spawn_id,
        owner_id,
        owner_since,
        previous_owner_id,
        active,
        member_count,
    ) = row;
    RoomRecord {
        id: ChannelId(id as u64),
        guild_id: GuildId(guild_id as u64),
        name,
        position,
        is_user_room,
        spawn_id: spawn_id.map(|v| ChannelId(v as u64)),
        owner_id: owner_id.map(|v| UserId(v as u64)),
        owner_since: owner_since.map(from_millis),
        previous_owner_id: previous_owner_id.map(|v| UserId(v as u64)),
        active,
        member_count,
    }
}

const ROOM_COLUMNS: &str = "discord_id, guild_id, name, position, is_user_room, spawn_id, \
                            owner_id, owner_since, previous_owner_id, active, member_count";

/// Repository for channel operations.
pub struct ChannelRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ChannelRepository<'a> {
    /// Create a new channel repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or update a channel row.
    ///
    /// Ownership columns are managed by `set_owner`/`clear_owner`, not
    /// here, so a live-state upsert cannot clobber a racing transfer.
    pub async fn upsert_channel(&self, room: &RoomRecord) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO channels
                (discord_id, guild_id, name, position, is_user_room, spawn_id,
                 owner_id, owner_since, previous_owner_id, active, member_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(discord_id) DO UPDATE SET
                name = excluded.name,
                position = excluded.position,
                is_user_room = excluded.is_user_room,
                spawn_id = COALESCE(excluded.spawn_id, channels.spawn_id),
                active = excluded.active,
                member_count = excluded.member_count
            "#,
        )
        .bind(room.id.0 as i64)
        .bind(room.guild_id.0 as i64)
        .bind(&room.name)
        .bind(room.position)
        .bind(room.is_user_room)
        .bind(room.spawn_id.map(|v| v.0 as i64))
        .bind(room.owner_id.map(|v| v.0 as i64))
        .bind(room.owner_since.map(to_millis))
        .bind(room.previous_owner_id.map(|v| v.0 as i64))
        .bind(room.active)
        .bind(room.member_count)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Find a channel row by id.
    pub async fn get_channel(&self, id: ChannelId) -> Result<Option<RoomRecord>, DbError> {
        let row = sqlx::query_as::<_, RoomRow>(&format!(
            "SELECT {ROOM_COLUMNS} FROM channels WHERE discord_id = ?"
        ))
        .bind(id.0 as i64)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(room_from_row))
    }

    /// All rows still marked active in a guild.
    pub async fn active_channels(&self, guild: GuildId) -> Result<Vec<RoomRecord>, DbError> {
        let rows = sqlx::query_as::<_, RoomRow>(&format!(
            "SELECT {ROOM_COLUMNS} FROM channels WHERE guild_id = ? AND active = 1"
        ))
        .bind(guild.0 as i64)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(room_from_row).collect())
    }

    /// Count of active user-rooms in a guild.
    pub async fn user_room_count(&self, guild: GuildId) -> Result<i64, DbError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM channels WHERE guild_id = ? AND is_user_room = 1 AND active = 1",
        )
        .bind(guild.0 as i64)
        .fetch_one(self.pool)
        .await?;

        Ok(count)
    }

    /// Soft-delete: the row is kept for audit, ownership cleared.
    pub async fn delete_channel(&self, id: ChannelId) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE channels
            SET active = 0, owner_id = NULL, owner_since = NULL, member_count = 0
            WHERE discord_id = ?
            "#,
        )
        .bind(id.0 as i64)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Record an owner, remembering who held the room before.
    pub async fn set_owner(
        &self,
        channel: ChannelId,
        owner: UserId,
        owned_since: DateTime<Utc>,
        previous: Option<UserId>,
    ) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE channels
            SET owner_id = ?, owner_since = ?, previous_owner_id = ?
            WHERE discord_id = ?
            "#,
        )
        .bind(owner.0 as i64)
        .bind(to_millis(owned_since))
        .bind(previous.map(|v| v.0 as i64))
        .bind(channel.0 as i64)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Remove the owner record for a channel.
    pub async fn clear_owner(&self, channel: ChannelId) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE channels
            SET previous_owner_id = owner_id, owner_id = NULL, owner_since = NULL
            WHERE discord_id = ?
            "#,
        )
        .bind(channel.0 as i64)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Write the canonical member count.
    pub async fn set_member_count(&self, channel: ChannelId, count: i64) -> Result<(), DbError> {
        sqlx::query("UPDATE channels SET member_count = ? WHERE discord_id = ?")
            .bind(count)
            .bind(channel.0 as i64)
            .execute(self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn room(id: u64) -> RoomRecord {
        RoomRecord {
            id: ChannelId(id),
            guild_id: GuildId(9),
            name: "Case's Channel".to_string(),
            position: 2,
            is_user_room: true,
            spawn_id: Some(ChannelId(100)),
            owner_id: None,
            owner_since: None,
            previous_owner_id: None,
            active: true,
            member_count: 1,
        }
    }

    #[tokio::test]
    async fn upsert_preserves_ownership_columns() {
        let db = Database::new(":memory:").await.unwrap();
        let channels = db.channels();
        let now = Utc::now();

        channels.upsert_channel(&room(5)).await.unwrap();
        channels
            .set_owner(ChannelId(5), UserId(1), now, None)
            .await
            .unwrap();

        // A later live-state upsert must not clear the owner.
        let mut updated = room(5);
        updated.name = "Renamed".to_string();
        updated.member_count = 3;
        channels.upsert_channel(&updated).await.unwrap();

        let row = channels.get_channel(ChannelId(5)).await.unwrap().unwrap();
        assert_eq!(row.owner_id, Some(UserId(1)));
        assert_eq!(row.name, "Renamed");
        assert_eq!(row.member_count, 3);
    }

    #[tokio::test]
    async fn delete_keeps_row_for_audit() {
        let db = Database::new(":memory:").await.unwrap();
        let channels = db.channels();

        channels.upsert_channel(&room(5)).await.unwrap();
        channels.delete_channel(ChannelId(5)).await.unwrap();

        let row = channels.get_channel(ChannelId(5)).await.unwrap().unwrap();
        assert!(!row.active);
        assert_eq!(row.owner_id, None);
        assert_eq!(channels.user_room_count(GuildId(9)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn clear_owner_remembers_previous() {
        let db = Database::new(":memory:").await.unwrap();
        let channels = db.channels();
        let now = Utc::now();

        channels.upsert_channel(&room(5)).await.unwrap();
        channels
            .set_owner(ChannelId(5), UserId(7), now, None)
            .await
            .unwrap();
        channels.clear_owner(ChannelId(5)).await.unwrap();

        let row = channels.get_channel(ChannelId(5)).await.unwrap().unwrap();
        assert_eq!(row.owner_id, None);
        assert_eq!(row.previous_owner_id, Some(UserId(7)));
    }

    #[tokio::test]
    async fn set_owner_on_unknown_row_is_not_found() {
        let db = Database::new(":memory:").await.unwrap();
        let err = db
            .channels()
            .set_owner(ChannelId(404), UserId(1), Utc::now(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound));
    }
}
