//! Unified error handling for atriumd.
//!
//! Layer errors (`DbError`, `CacheError`, `PlatformError`) live with their
//! modules; this module provides the cross-layer hierarchy used by event
//! handlers and the command surface, with retry classification and metric
//! labeling.

use crate::cache::CacheError;
use crate::db::DbError;
use crate::platform::PlatformError;
use thiserror::Error;

// ============================================================================
// Core Errors (event processing)
// ============================================================================

/// Errors that can occur while processing a gateway event.
///
/// These never escape an event handler; they feed the per-user error
/// counter and the failure metrics.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("store error: {0}")]
    Db(#[from] DbError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Malformed input (missing ids, empty names). Refused, never patched
    /// with placeholder rows.
    #[error("malformed input: {0}")]
    MalformedInput(String),
}

impl CoreError {
    /// Whether a retry may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            CoreError::Db(e) => e.is_transient(),
            CoreError::Cache(e) => e.is_transient(),
            CoreError::Platform(e) => e.is_transient(),
            CoreError::MalformedInput(_) => false,
        }
    }

    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Db(_) => "db",
            CoreError::Cache(_) => "cache",
            CoreError::Platform(e) => e.error_code(),
            CoreError::MalformedInput(_) => "malformed_input",
        }
    }
}

// ============================================================================
// Command Errors (slash surface)
// ============================================================================

/// Errors returned to the command surface.
///
/// Command handlers return `{ok}` or `{error, message}`; the message here
/// is the user-facing half.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("you do not own this room")]
    NotOwner,

    #[error("no such room")]
    NoSuchRoom,

    #[error("this room is read-only")]
    ReadOnlyRoom,

    #[error("that user is not in this room")]
    TargetNotInRoom,

    #[error("slow down: too many {action} actions")]
    RateLimited { action: &'static str },

    #[error("a coup is already underway")]
    CoupInProgress,

    #[error("no coup is underway")]
    NoCoup,

    #[error("you already voted")]
    AlreadyVoted,

    #[error("{0}")]
    Refused(String),

    #[error("something went wrong, try again")]
    Internal(#[source] CoreError),
}

impl CommandError {
    /// The message shown to the invoking user.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

impl From<DbError> for CommandError {
    fn from(e: DbError) -> Self {
        CommandError::Internal(CoreError::Db(e))
    }
}

impl From<CacheError> for CommandError {
    fn from(e: CacheError) -> Self {
        CommandError::Internal(CoreError::Cache(e))
    }
}

impl From<PlatformError> for CommandError {
    fn from(e: PlatformError) -> Self {
        CommandError::Internal(CoreError::Platform(e))
    }
}
