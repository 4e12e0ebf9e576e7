//! Channel-update handler: manual rename detection.
//!
//! When a room's name changes under an owner, the audit log decides
//! whether to remember it. Only a realm Administrator's rename is
//! persisted as the owner's preferred name; an audit failure persists
//! nothing. Bot-generated names never stick.

use crate::cache::CacheHandle;
use crate::config::{RealmConfig, RoomsConfig};
use crate::db::Database;
use crate::dispatch::EventHandler;
use crate::error::CoreError;
use crate::platform::{AuditAction, ChannelInfo, GatewayEvent, GuildId, Platform};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ChannelUpdateHandler {
    guild: GuildId,
    realm: RealmConfig,
    rooms: RoomsConfig,
    db: Database,
    cache: CacheHandle,
    platform: Arc<dyn Platform>,
}

impl ChannelUpdateHandler {
    pub fn new(
        guild: GuildId,
        realm: RealmConfig,
        rooms: RoomsConfig,
        db: Database,
        cache: CacheHandle,
        platform: Arc<dyn Platform>,
    ) -> Self {
        Self {
            guild,
            realm,
            rooms,
            db,
            cache,
            platform,
        }
    }

    async fn process(&self, channel: ChannelInfo) -> Result<(), CoreError> {
        if channel.guild_id != self.guild {
            return Ok(());
        }
        let Some(room) = self.db.channels().get_channel(channel.id).await? else {
            return Ok(());
        };
        if !room.is_user_room || !room.active || self.realm.is_excluded(channel.id) {
            return Ok(());
        }

        if room.name != channel.name {
            self.detect_manual_rename(&channel, room.owner_id).await?;
        }

        // Keep the row's live fields fresh regardless of the outcome.
        let mut updated = room;
        updated.name = channel.name.clone();
        updated.position = channel.position;
        self.db.channels().upsert_channel(&updated).await?;
        Ok(())
    }

    async fn detect_manual_rename(
        &self,
        channel: &ChannelInfo,
        owner: Option<crate::platform::UserId>,
    ) -> Result<(), CoreError> {
        let Some(owner) = owner else {
            return Ok(());
        };

        // A name the bot would have produced is never stored: the
        // default template render, or the already-stored preference.
        let stored = self.db.prefs().get_owner_prefs(owner, self.guild).await?;
        if stored.as_ref().and_then(|p| p.preferred_name.as_deref()) == Some(channel.name.as_str())
        {
            return Ok(());
        }
        if let Some(member) = self.platform.member(self.guild, owner).await?
            && channel.name == self.rooms.room_name_for(&member.display_name)
        {
            return Ok(());
        }

        let entries = match self
            .platform
            .fetch_audit_log(self.guild, AuditAction::ChannelUpdate, channel.id)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                // Fail closed: an unverifiable rename is not remembered.
                warn!(channel_id = %channel.id, error = %e, "Audit log unavailable, rename not persisted");
                return Ok(());
            }
        };

        let Some(entry) = entries.first() else {
            debug!(channel_id = %channel.id, "No audit entry for rename");
            return Ok(());
        };

        let executor_is_admin = self
            .platform
            .member(self.guild, entry.executor)
            .await?
            .is_some_and(|m| m.is_admin);
        if !executor_is_admin {
            debug!(
                channel_id = %channel.id,
                executor = %entry.executor,
                "Rename by non-administrator, not persisted"
            );
            return Ok(());
        }

        let name = channel.name.clone();
        self.db
            .prefs()
            .update_owner_prefs(owner, self.guild, |p| {
                p.preferred_name = Some(name);
            })
            .await?;
        self.cache.invalidate_user_prefs(owner, self.guild).await?;
        debug!(channel_id = %channel.id, owner_id = %owner, "Administrator rename persisted");
        Ok(())
    }
}

#[async_trait]
impl EventHandler for ChannelUpdateHandler {
    async fn handle(&self, event: GatewayEvent) {
        if let GatewayEvent::ChannelUpdate { channel, .. } = event
            && let Err(e) = self.process(channel).await
        {
            warn!(error = %e, "Channel update handling failed");
        }
    }
}
