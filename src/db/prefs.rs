//! Owner-preferences repository.
//!
//! Preferences are keyed by `(owner_id, guild_id)`, not by channel: an
//! owner carries their room setup and moderation lists into every room
//! they come to own. List columns are JSON-serialised.

use super::{DbError, from_millis, to_millis};
use crate::platform::{ChannelId, GuildId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// A scoped nickname applied by an owner to a member of one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRecord {
    pub user_id: UserId,
    pub original_nickname: Option<String>,
    pub scoped_nickname: String,
    pub channel_id: ChannelId,
    pub renamed_at: DateTime<Utc>,
}

/// Preferences carried by a room owner.
///
/// Serialisable so the cache can shadow the stored row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerPrefs {
    pub owner_id: UserId,
    pub guild_id: GuildId,
    pub preferred_name: Option<String>,
    pub preferred_limit: Option<u32>,
    pub preferred_locked: Option<bool>,
    pub preferred_hidden: Option<bool>,
    pub banned_users: Vec<UserId>,
    pub muted_users: Vec<UserId>,
    pub deafened_users: Vec<UserId>,
    pub kicked_users: Vec<UserId>,
    pub renamed_users: Vec<RenameRecord>,
    pub last_updated: DateTime<Utc>,
}

impl OwnerPrefs {
    /// An empty preference set for an owner.
    pub fn empty(owner: UserId, guild: GuildId) -> Self {
        Self {
            owner_id: owner,
            guild_id: guild,
            preferred_name: None,
            preferred_limit: None,
            preferred_locked: None,
            preferred_hidden: None,
            banned_users: Vec::new(),
            muted_users: Vec::new(),
            deafened_users: Vec::new(),
            kicked_users: Vec::new(),
            renamed_users: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// The rename record for a user scoped to a channel, if any.
    pub fn rename_for(&self, user: UserId, channel: ChannelId) -> Option<&RenameRecord> {
        self.renamed_users
            .iter()
            .find(|r| r.user_id == user && r.channel_id == channel)
    }
}

fn ids_from_json(raw: &str, column: &str) -> Result<Vec<UserId>, DbError> {
    serde_json::from_str(raw).map_err(|e| DbError::Corrupt(format!("{column}: {e}")))
}

type PrefsRow = (
    i64,
    i64,
    Option<String>,
    Option<i64>,
    Option<bool>,
    Option<bool>,
    String,
    String,
    String,
    String,
    String,
    i64,
);

fn prefs_from_row(row: PrefsRow) -> Result<OwnerPrefs, DbError> {
    let (
        owner_id,
        guild_id,
        preferred_name,
        preferred_limit,
        preferred_locked,
        preferred_hidden,
        banned,
        muted,
        deafened,
        kicked,
        renamed,
        last_updated,
    ) = row;

    Ok(OwnerPrefs {
        owner_id: UserId(owner_id as u64),
        guild_id: GuildId(guild_id as u64),
        preferred_name,
        preferred_limit: preferred_limit.map(|v| v as u32),
        preferred_locked,
        preferred_hidden,
        banned_users: ids_from_json(&banned, "banned_users")?,
        muted_users: ids_from_json(&muted, "muted_users")?,
        deafened_users: ids_from_json(&deafened, "deafened_users")?,
        kicked_users: ids_from_json(&kicked, "kicked_users")?,
        renamed_users: serde_json::from_str(&renamed)
            .map_err(|e| DbError::Corrupt(format!("renamed_users: {e}")))?,
        last_updated: from_millis(last_updated),
    })
}

const PREFS_COLUMNS: &str = "owner_id, guild_id, preferred_name, preferred_limit, \
                             preferred_locked, preferred_hidden, banned_users, muted_users, \
                             deafened_users, kicked_users, renamed_users, last_updated";

/// Repository for owner-preference operations.
pub struct PrefsRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> PrefsRepository<'a> {
    /// Create a new preferences repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch preferences for an owner, or `None` if they never set any.
    pub async fn get_owner_prefs(
        &self,
        owner: UserId,
        guild: GuildId,
    ) -> Result<Option<OwnerPrefs>, DbError> {
        let row = sqlx::query_as::<_, PrefsRow>(&format!(
            "SELECT {PREFS_COLUMNS} FROM owner_prefs WHERE owner_id = ? AND guild_id = ?"
        ))
        .bind(owner.0 as i64)
        .bind(guild.0 as i64)
        .fetch_optional(self.pool)
        .await?;

        row.map(prefs_from_row).transpose()
    }

    /// Patch preferences: load (or start empty), apply `patch`, write
    /// back with a fresh `last_updated`. Returns the stored result.
    ///
    /// Callers must invalidate the cached copy afterwards.
    pub async fn update_owner_prefs<F>(
        &self,
        owner: UserId,
        guild: GuildId,
        patch: F,
    ) -> Result<OwnerPrefs, DbError>
    where
        F: FnOnce(&mut OwnerPrefs),
    {
        let mut prefs = self
            .get_owner_prefs(owner, guild)
            .await?
            .unwrap_or_else(|| OwnerPrefs::empty(owner, guild));

        patch(&mut prefs);
        prefs.last_updated = Utc::now();

        let encode = |v: &Vec<UserId>| serde_json::to_string(v).unwrap_or_else(|_| "[]".into());

        sqlx::query(
            r#"
            INSERT INTO owner_prefs
                (owner_id, guild_id, preferred_name, preferred_limit, preferred_locked,
                 preferred_hidden, banned_users, muted_users, deafened_users, kicked_users,
                 renamed_users, last_updated)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(owner_id, guild_id) DO UPDATE SET
                preferred_name = excluded.preferred_name,
                preferred_limit = excluded.preferred_limit,
                preferred_locked = excluded.preferred_locked,
                preferred_hidden = excluded.preferred_hidden,
                banned_users = excluded.banned_users,
                muted_users = excluded.muted_users,
                deafened_users = excluded.deafened_users,
                kicked_users = excluded.kicked_users,
                renamed_users = excluded.renamed_users,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(prefs.owner_id.0 as i64)
        .bind(prefs.guild_id.0 as i64)
        .bind(&prefs.preferred_name)
        .bind(prefs.preferred_limit.map(|v| v as i64))
        .bind(prefs.preferred_locked)
        .bind(prefs.preferred_hidden)
        .bind(encode(&prefs.banned_users))
        .bind(encode(&prefs.muted_users))
        .bind(encode(&prefs.deafened_users))
        .bind(encode(&prefs.kicked_users))
        .bind(serde_json::to_string(&prefs.renamed_users).unwrap_or_else(|_| "[]".into()))
        .bind(to_millis(prefs.last_updated))
        .execute(self.pool)
        .await?;

        Ok(prefs)
    }
}
