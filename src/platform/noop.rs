//! No-op platform adapter.
//!
//! Used when the daemon starts without a client adapter linked in. The
//! realm looks empty, queries succeed with nothing, mutations succeed
//! without effect. Room creation is the one thing that cannot be
//! pretended, so it reports the missing client.

use super::{
    AuditAction, AuditEntry, ChannelId, ChannelInfo, CreateChannelSpec, Embed, GuildId, Member,
    OverwriteTarget, PermissionOverwrite, Platform, PlatformError, UserId,
};
use async_trait::async_trait;

pub struct NoOpPlatform;

#[async_trait]
impl Platform for NoOpPlatform {
    async fn create_voice_channel(
        &self,
        _spec: CreateChannelSpec,
    ) -> Result<ChannelInfo, PlatformError> {
        Err(PlatformError::Transient(
            "no platform client connected".to_string(),
        ))
    }

    async fn delete_channel(&self, _channel: ChannelId) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn set_channel_name(
        &self,
        _channel: ChannelId,
        _name: &str,
    ) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn set_channel_position(
        &self,
        _channel: ChannelId,
        _position: i32,
    ) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn set_user_limit(
        &self,
        _channel: ChannelId,
        _limit: Option<u32>,
    ) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn upsert_overwrite(
        &self,
        _channel: ChannelId,
        _overwrite: PermissionOverwrite,
    ) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn delete_overwrite(
        &self,
        _channel: ChannelId,
        _target: OverwriteTarget,
    ) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn move_member(
        &self,
        _guild: GuildId,
        _user: UserId,
        _to: ChannelId,
    ) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn disconnect_member(
        &self,
        _guild: GuildId,
        _user: UserId,
    ) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn set_mute(
        &self,
        _guild: GuildId,
        _user: UserId,
        _muted: bool,
    ) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn set_deafen(
        &self,
        _guild: GuildId,
        _user: UserId,
        _deafened: bool,
    ) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn set_nickname(
        &self,
        _guild: GuildId,
        _user: UserId,
        _nick: Option<&str>,
    ) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn send_embed(&self, _channel: ChannelId, _embed: Embed) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn fetch_audit_log(
        &self,
        _guild: GuildId,
        _action: AuditAction,
        _target: ChannelId,
    ) -> Result<Vec<AuditEntry>, PlatformError> {
        Ok(vec![])
    }

    async fn voice_channels(&self, _guild: GuildId) -> Result<Vec<ChannelInfo>, PlatformError> {
        Ok(vec![])
    }

    async fn channel(&self, _channel: ChannelId) -> Result<Option<ChannelInfo>, PlatformError> {
        Ok(None)
    }

    async fn channel_members(&self, _channel: ChannelId) -> Result<Vec<Member>, PlatformError> {
        Ok(vec![])
    }

    async fn member(
        &self,
        _guild: GuildId,
        _user: UserId,
    ) -> Result<Option<Member>, PlatformError> {
        Ok(None)
    }
}
