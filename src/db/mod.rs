//! Database module for persistent storage.
//!
//! Provides async SQLite database access using SQLx for:
//! - Voice sessions (one row per contiguous presence)
//! - Channel rows (user-rooms and tracked rooms)
//! - Owner preferences
//! - Moderation history
//!
//! The at-most-one-active session invariant is pushed into the store as a
//! partial unique index; a violation surfaces as [`DbError::Conflict`],
//! which callers treat as an expected race outcome.

mod channels;
mod history;
mod prefs;
mod sessions;

pub use channels::{ChannelRepository, RoomRecord};
pub use history::{ModAction, ModHistoryEntry, ModHistoryRepository};
pub use prefs::{OwnerPrefs, PrefsRepository, RenameRecord};
pub use sessions::{Session, SessionRepository};

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("open session already exists for user {user_id} in guild {guild_id}")]
    Conflict { user_id: u64, guild_id: u64 },
    #[error("not found")]
    NotFound,
    #[error("corrupt column value: {0}")]
    Corrupt(String),
}

impl DbError {
    /// Whether a retry may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DbError::Sqlx(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Protocol(_)
            ),
            _ => false,
        }
    }

    /// Whether this is the expected uniqueness race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DbError::Conflict { .. })
    }
}

/// Whether a sqlx error is a unique-index violation.
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(d) if d.message().contains("UNIQUE constraint failed"))
}

/// Timestamps are stored as unix milliseconds.
pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Closed-session duration in whole seconds, floored, never negative.
pub(crate) fn duration_sec(joined_ms: i64, left_ms: i64) -> i64 {
    (left_ms - joined_ms).max(0) / 1000
}

/// Retry a store operation on transient failure.
///
/// Up to 3 retries with exponential backoff; conflicts and not-found pass
/// straight through to the caller.
pub async fn retry<T, F, Fut>(op: &'static str, mut f: F) -> Result<T, DbError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < 3 => {
                attempt += 1;
                let backoff = Duration::from_millis(50 * 2u64.pow(attempt));
                warn!(op = op, attempt = attempt, error = %e, "Transient store error, retrying");
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Database handle with connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connection acquire timeout - prevents connection storms from blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a new database connection, running migrations if needed.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let pool = if path == ":memory:" {
            // A uniquely named shared-cache memory database: the pool's
            // connections see one database, separate handles do not.
            static MEMORY_DB_SEQ: AtomicU64 = AtomicU64::new(0);
            let n = MEMORY_DB_SEQ.fetch_add(1, Ordering::SeqCst);
            let options = SqliteConnectOptions::from_str(&format!(
                "sqlite:file:atriumd-mem-{n}?mode=memory&cache=shared"
            ))?;

            SqlitePoolOptions::new()
                .max_connections(5)
                // The database vanishes with its last connection.
                .min_connections(1)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                warn!(path = %parent.display(), error = %e, "Failed to create database directory");
            }

            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        };

        info!(path = %path, "Database connected");

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Get reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run embedded migrations.
    /// Checks for each table and runs the full migration if any are missing.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
        async fn table_exists(pool: &SqlitePool, table: &str) -> bool {
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?)",
            )
            .bind(table)
            .fetch_one(pool)
            .await
            .unwrap_or(false)
        }

        let core_tables = ["voice_sessions", "channels", "owner_prefs", "mod_history"];
        let mut core_ok = true;
        for t in core_tables {
            if !table_exists(pool, t).await {
                core_ok = false;
                break;
            }
        }

        if core_ok {
            info!("Database already initialized");
        } else {
            Self::run_migration_file(pool, include_str!("../../migrations/001_init.sql")).await;
            info!("Database migrations applied (001_init)");
        }

        Ok(())
    }

    /// Run a single migration file, executing each statement.
    async fn run_migration_file(pool: &SqlitePool, migration: &str) {
        for statement in migration.split(';') {
            let sql_lines: Vec<&str> = statement
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with("--"))
                .collect();

            if sql_lines.is_empty() {
                continue;
            }

            let sql = sql_lines.join("\n");

            if let Err(e) = sqlx::query(&sql).execute(pool).await {
                let err_str = e.to_string();
                if !err_str.contains("already exists") {
                    warn!(sql = %sql, error = %e, "Migration statement failed");
                }
            }
        }
    }

    /// Get session repository.
    pub fn sessions(&self) -> SessionRepository<'_> {
        SessionRepository::new(&self.pool)
    }

    /// Get channel repository.
    pub fn channels(&self) -> ChannelRepository<'_> {
        ChannelRepository::new(&self.pool)
    }

    /// Get owner-preferences repository.
    pub fn prefs(&self) -> PrefsRepository<'_> {
        PrefsRepository::new(&self.pool)
    }

    /// Get moderation-history repository.
    pub fn mod_history(&self) -> ModHistoryRepository<'_> {
        ModHistoryRepository::new(&self.pool)
    }
}
