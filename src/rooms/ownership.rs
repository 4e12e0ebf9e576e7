//! Ownership manager.
//!
//! Assigns, transfers and removes room ownership. The inheritor when an
//! owner leaves is the longest-standing member still in the room, read
//! from the cached member set, then the open-session table; failing
//! both, the smallest user id makes a stable pick.

use super::prefs::PreferenceApplicator;
use crate::cache::{CacheHandle, CallState, ChannelMember, OwnerEntry, keys};
use crate::db::{Database, RoomRecord};
use crate::error::CoreError;
use crate::platform::{
    ChannelId, Embed, GuildId, Member, OverwriteTarget, PermissionOverwrite, Platform,
    PlatformError, UserId, with_deadline,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct OwnershipManager {
    guild: GuildId,
    db: Database,
    cache: CacheHandle,
    platform: Arc<dyn Platform>,
    prefs: Arc<PreferenceApplicator>,
}

impl OwnershipManager {
    pub fn new(
        guild: GuildId,
        db: Database,
        cache: CacheHandle,
        platform: Arc<dyn Platform>,
        prefs: Arc<PreferenceApplicator>,
    ) -> Self {
        Self {
            guild,
            db,
            cache,
            platform,
            prefs,
        }
    }

    /// Write the owner record and its cache entry, nothing more.
    ///
    /// Used by room creation, which applies preferences later, after the
    /// platform has settled.
    pub async fn record_owner(
        &self,
        channel: ChannelId,
        owner: UserId,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let previous = self
            .db
            .channels()
            .get_channel(channel)
            .await?
            .and_then(|room| room.owner_id);

        self.db
            .channels()
            .set_owner(channel, owner, at, previous)
            .await?;
        self.cache
            .set(
                &keys::channel_owner(channel),
                &OwnerEntry {
                    user_id: owner,
                    owned_since: at,
                },
                None,
            )
            .await?;
        Ok(())
    }

    /// Record a new owner and apply their channel-level preferences.
    ///
    /// A call state belonging to a different owner is dropped first; it
    /// shadows moderation that no longer applies.
    pub async fn set_owner(
        &self,
        channel: ChannelId,
        owner: UserId,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        self.record_owner(channel, owner, at).await?;

        let state_key = keys::call_state(channel);
        if let Some(state) = self.cache.get::<CallState>(&state_key).await?
            && state.current_owner != Some(owner)
        {
            self.cache.delete(&state_key).await?;
        }

        self.prefs.apply_owner_setup(channel, owner).await?;
        Ok(())
    }

    /// Remove the owner record for a room.
    pub async fn remove_owner(&self, channel: ChannelId) -> Result<(), CoreError> {
        self.db.channels().clear_owner(channel).await?;
        self.cache.delete(&keys::channel_owner(channel)).await?;
        self.cache.delete(&keys::call_state(channel)).await?;
        Ok(())
    }

    /// Transfer a room after its owner left with members still inside.
    ///
    /// User-specific permission overwrites are cleared (the departed
    /// owner's included); role overwrites are preserved.
    pub async fn handle_owner_left(
        &self,
        room: &RoomRecord,
        members: &[Member],
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let candidates: Vec<&Member> = members.iter().filter(|m| !m.is_bot).collect();
        let Some(inheritor) = self.select_inheritor(room.id, &candidates).await? else {
            debug!(channel_id = %room.id, "No inheritor available");
            return Ok(());
        };

        if let Some(info) = self.platform.channel(room.id).await? {
            for overwrite in &info.overwrites {
                if let OverwriteTarget::User(_) = overwrite.target {
                    match with_deadline(
                        crate::platform::DEFAULT_DEADLINE,
                        self.platform.delete_overwrite(room.id, overwrite.target),
                    )
                    .await
                    {
                        Ok(()) | Err(PlatformError::NotFound) => {}
                        Err(e) => {
                            warn!(channel_id = %room.id, error = %e, "Could not clear user overwrite")
                        }
                    }
                }
            }
        }

        with_deadline(
            crate::platform::DEFAULT_DEADLINE,
            self.platform
                .upsert_overwrite(room.id, PermissionOverwrite::owner(inheritor)),
        )
        .await?;

        self.set_owner(room.id, inheritor, at).await?;
        self.prefs
            .apply_scoped_renames(inheritor, room.id, members)
            .await?;

        let display = self
            .platform
            .member(self.guild, inheritor)
            .await?
            .map(|m| m.display_name)
            .unwrap_or_else(|| inheritor.to_string());
        let notice = Embed {
            title: "Ownership transferred".to_string(),
            description: format!("{display} now owns this room."),
            fields: Vec::new(),
        };
        if let Err(e) = with_deadline(
            crate::platform::DEFAULT_DEADLINE,
            self.platform.send_embed(room.id, notice),
        )
        .await
        {
            warn!(channel_id = %room.id, error = %e, "Could not post transfer notice");
        }

        info!(channel_id = %room.id, owner_id = %inheritor, "Room ownership transferred");
        Ok(())
    }

    /// Longest-standing member still in the room.
    ///
    /// Preferred source is the cached member set; fallback is the open
    /// session table; last resort is the smallest user id.
    pub async fn select_inheritor(
        &self,
        channel: ChannelId,
        candidates: &[&Member],
    ) -> Result<Option<UserId>, CoreError> {
        if candidates.is_empty() {
            return Ok(None);
        }
        let candidate_ids: Vec<UserId> = candidates.iter().map(|m| m.user_id).collect();

        if let Some(cached) = self
            .cache
            .get::<Vec<ChannelMember>>(&keys::channel_members(channel))
            .await?
            && let Some(best) = cached
                .iter()
                .filter(|m| candidate_ids.contains(&m.user_id))
                .min_by_key(|m| (m.joined_at, m.user_id))
        {
            return Ok(Some(best.user_id));
        }

        let sessions = self.db.sessions().active_sessions_in_channel(channel).await?;
        if let Some(best) = sessions
            .iter()
            .filter(|s| candidate_ids.contains(&s.user_id))
            .min_by_key(|s| (s.joined_at, s.user_id))
        {
            return Ok(Some(best.user_id));
        }

        Ok(candidate_ids.iter().min().copied())
    }

    /// Universal ownership sync, also run by the reconciler.
    ///
    /// Removes an owner who is no longer a member, elects one when the
    /// room has none, re-elects on mismatch. Returns whether anything
    /// changed.
    pub async fn sync_channel_ownership(&self, channel: ChannelId) -> Result<bool, CoreError> {
        let Some(room) = self.db.channels().get_channel(channel).await? else {
            return Ok(false);
        };
        if !room.is_user_room || !room.active {
            return Ok(false);
        }

        let members: Vec<Member> = self
            .platform
            .channel_members(channel)
            .await?
            .into_iter()
            .filter(|m| !m.is_bot)
            .collect();

        if let Some(owner) = room.owner_id
            && members.iter().any(|m| m.user_id == owner)
        {
            return Ok(false);
        }

        if members.is_empty() {
            if room.owner_id.is_some() {
                self.remove_owner(channel).await?;
                debug!(channel_id = %channel, "Orphaned owner record removed");
                return Ok(true);
            }
            return Ok(false);
        }

        let candidates: Vec<&Member> = members.iter().collect();
        let Some(heir) = self.select_inheritor(channel, &candidates).await? else {
            return Ok(false);
        };

        with_deadline(
            crate::platform::DEFAULT_DEADLINE,
            self.platform
                .upsert_overwrite(channel, PermissionOverwrite::owner(heir)),
        )
        .await?;
        self.set_owner(channel, heir, Utc::now()).await?;
        debug!(channel_id = %channel, owner_id = %heir, "Ownership re-elected");
        Ok(true)
    }
}
