//! Chat platform seam.
//!
//! The platform client library is an external collaborator; the control
//! plane only sees the [`Platform`] trait. Implementations translate
//! these calls into the platform's REST surface. Every call site wraps a
//! deadline via [`with_deadline`] so a stalled platform never wedges a
//! worker.

mod gateway;
pub mod noop;
mod types;

pub use gateway::{EventFamily, GatewayEvent, Transition, VoiceTransition};
pub use types::{
    AuditAction, AuditEntry, ChannelId, ChannelInfo, CreateChannelSpec, Embed, GuildId, Member,
    OverwriteTarget, PermissionOverwrite, PermissionSet, RoleId, UserId,
};

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Default deadline for platform mutations.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

/// Renames get a longer hard deadline; the platform throttles them.
pub const RENAME_DEADLINE: Duration = Duration::from_secs(8);

/// Errors surfaced by platform calls.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("not found")]
    NotFound,
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("rate limited")]
    RateLimited,
    #[error("deadline exceeded")]
    Timeout,
    #[error("transient platform error: {0}")]
    Transient(String),
}

impl PlatformError {
    /// Whether a retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlatformError::RateLimited | PlatformError::Timeout | PlatformError::Transient(_)
        )
    }

    /// Static label for metrics.
    pub fn error_code(&self) -> &'static str {
        match self {
            PlatformError::NotFound => "not_found",
            PlatformError::PermissionDenied(_) => "permission_denied",
            PlatformError::RateLimited => "rate_limited",
            PlatformError::Timeout => "timeout",
            PlatformError::Transient(_) => "transient",
        }
    }
}

/// Run a platform call under a deadline.
///
/// A timeout is reported as [`PlatformError::Timeout`], which callers
/// treat as recoverable; no cancellation crosses component boundaries.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, PlatformError>
where
    F: Future<Output = Result<T, PlatformError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(PlatformError::Timeout),
    }
}

/// The platform REST surface the control plane drives.
#[async_trait]
pub trait Platform: Send + Sync {
    async fn create_voice_channel(
        &self,
        spec: CreateChannelSpec,
    ) -> Result<ChannelInfo, PlatformError>;

    async fn delete_channel(&self, channel: ChannelId) -> Result<(), PlatformError>;

    async fn set_channel_name(&self, channel: ChannelId, name: &str)
    -> Result<(), PlatformError>;

    async fn set_channel_position(
        &self,
        channel: ChannelId,
        position: i32,
    ) -> Result<(), PlatformError>;

    async fn set_user_limit(
        &self,
        channel: ChannelId,
        limit: Option<u32>,
    ) -> Result<(), PlatformError>;

    async fn upsert_overwrite(
        &self,
        channel: ChannelId,
        overwrite: PermissionOverwrite,
    ) -> Result<(), PlatformError>;

    async fn delete_overwrite(
        &self,
        channel: ChannelId,
        target: OverwriteTarget,
    ) -> Result<(), PlatformError>;

    async fn move_member(
        &self,
        guild: GuildId,
        user: UserId,
        to: ChannelId,
    ) -> Result<(), PlatformError>;

    async fn disconnect_member(&self, guild: GuildId, user: UserId)
    -> Result<(), PlatformError>;

    async fn set_mute(
        &self,
        guild: GuildId,
        user: UserId,
        muted: bool,
    ) -> Result<(), PlatformError>;

    async fn set_deafen(
        &self,
        guild: GuildId,
        user: UserId,
        deafened: bool,
    ) -> Result<(), PlatformError>;

    async fn set_nickname(
        &self,
        guild: GuildId,
        user: UserId,
        nick: Option<&str>,
    ) -> Result<(), PlatformError>;

    async fn send_embed(&self, channel: ChannelId, embed: Embed) -> Result<(), PlatformError>;

    async fn fetch_audit_log(
        &self,
        guild: GuildId,
        action: AuditAction,
        target: ChannelId,
    ) -> Result<Vec<AuditEntry>, PlatformError>;

    /// All voice channels in the guild, as the platform currently sees them.
    async fn voice_channels(&self, guild: GuildId) -> Result<Vec<ChannelInfo>, PlatformError>;

    /// A single channel, or `None` if it no longer exists.
    async fn channel(&self, channel: ChannelId) -> Result<Option<ChannelInfo>, PlatformError>;

    /// Current members of a voice channel.
    async fn channel_members(&self, channel: ChannelId) -> Result<Vec<Member>, PlatformError>;

    /// A guild member, or `None` if they left the realm.
    async fn member(&self, guild: GuildId, user: UserId)
    -> Result<Option<Member>, PlatformError>;
}
