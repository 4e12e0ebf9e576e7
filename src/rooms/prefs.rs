//! Preference applicator.
//!
//! Applies an owner's stored preferences to live platform state: channel
//! setup when a room changes hands, and the moderation carry-over when a
//! new member joins. Owner prefs are authoritative; the cached call
//! state only shadows what has actually been applied.

use crate::cache::{CacheHandle, CallState, keys};
use crate::config::RoomsConfig;
use crate::db::{Database, OwnerPrefs, RoomRecord};
use crate::error::CoreError;
use crate::platform::{
    ChannelId, GuildId, Member, OverwriteTarget, PermissionOverwrite, PermissionSet, Platform,
    PlatformError, RoleId, UserId, with_deadline,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Cached preference copies live this long.
const PREFS_TTL: Duration = Duration::from_secs(300);

/// What happened to a new joiner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinerOutcome {
    /// Banned by the owner; disconnected from the room.
    Disconnected,
    /// Stayed; any mute/deafen/rename entries were applied.
    Applied,
}

pub struct PreferenceApplicator {
    guild: GuildId,
    rooms: RoomsConfig,
    db: Database,
    cache: CacheHandle,
    platform: Arc<dyn Platform>,
}

impl PreferenceApplicator {
    pub fn new(
        guild: GuildId,
        rooms: RoomsConfig,
        db: Database,
        cache: CacheHandle,
        platform: Arc<dyn Platform>,
    ) -> Self {
        Self {
            guild,
            rooms,
            db,
            cache,
            platform,
        }
    }

    /// An owner's preferences, cache-accelerated.
    pub async fn prefs_for(&self, owner: UserId) -> Result<Option<OwnerPrefs>, CoreError> {
        let key = keys::user_prefs(owner, self.guild);
        if let Some(prefs) = self.cache.get::<OwnerPrefs>(&key).await? {
            return Ok(Some(prefs));
        }

        let prefs = self.db.prefs().get_owner_prefs(owner, self.guild).await?;
        if let Some(ref prefs) = prefs {
            self.cache.set(&key, prefs, Some(PREFS_TTL)).await?;
        }
        Ok(prefs)
    }

    /// Carry the room owner's moderation entries over to a new joiner.
    ///
    /// A ban disconnects and stops; mute/deafen/rename entries are
    /// best-effort; a missing permission is logged, not fatal.
    pub async fn apply_new_joiner(
        &self,
        user: UserId,
        room: &RoomRecord,
    ) -> Result<JoinerOutcome, CoreError> {
        let Some(owner) = room.owner_id else {
            return Ok(JoinerOutcome::Applied);
        };
        if owner == user {
            return Ok(JoinerOutcome::Applied);
        }
        let Some(prefs) = self.prefs_for(owner).await? else {
            return Ok(JoinerOutcome::Applied);
        };

        if prefs.banned_users.contains(&user) {
            match with_deadline(
                crate::platform::DEFAULT_DEADLINE,
                self.platform.disconnect_member(self.guild, user),
            )
            .await
            {
                Ok(()) | Err(PlatformError::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
            debug!(user_id = %user, channel_id = %room.id, "Banned user disconnected on join");
            return Ok(JoinerOutcome::Disconnected);
        }

        let mut state = self.call_state_for(room.id, Some(owner)).await?;

        if prefs.muted_users.contains(&user) {
            match with_deadline(
                crate::platform::DEFAULT_DEADLINE,
                self.platform.set_mute(self.guild, user, true),
            )
            .await
            {
                Ok(()) => {
                    if !state.muted_users.contains(&user) {
                        state.muted_users.push(user);
                    }
                }
                Err(e) => warn!(user_id = %user, error = %e, "Could not apply carry-over mute"),
            }
        }

        if prefs.deafened_users.contains(&user) {
            match with_deadline(
                crate::platform::DEFAULT_DEADLINE,
                self.platform.set_deafen(self.guild, user, true),
            )
            .await
            {
                Ok(()) => {
                    if !state.deafened_users.contains(&user) {
                        state.deafened_users.push(user);
                    }
                }
                Err(e) => warn!(user_id = %user, error = %e, "Could not apply carry-over deafen"),
            }
        }

        if let Some(record) = prefs.rename_for(user, room.id)
            && let Err(e) = with_deadline(
                crate::platform::DEFAULT_DEADLINE,
                self.platform
                    .set_nickname(self.guild, user, Some(&record.scoped_nickname)),
            )
            .await
        {
            warn!(user_id = %user, error = %e, "Could not apply scoped nickname");
        }

        state.last_updated = Utc::now();
        self.cache
            .set(&keys::call_state(room.id), &state, None)
            .await?;

        Ok(JoinerOutcome::Applied)
    }

    /// Apply an owner's channel-level preferences when they take a room.
    ///
    /// Name, limit and lock/hide go on with hard deadlines; bans are
    /// enforced against current members. User-level mute/deafen entries
    /// are not retroactively applied.
    pub async fn apply_owner_setup(
        &self,
        channel: ChannelId,
        owner: UserId,
    ) -> Result<(), CoreError> {
        let display_name = self
            .platform
            .member(self.guild, owner)
            .await?
            .map(|m| m.display_name)
            .unwrap_or_else(|| owner.to_string());

        let prefs = self.prefs_for(owner).await?;

        let name = prefs
            .as_ref()
            .and_then(|p| p.preferred_name.clone())
            .unwrap_or_else(|| self.rooms.room_name_for(&display_name));

        if let Err(e) = with_deadline(
            crate::platform::RENAME_DEADLINE,
            self.platform.set_channel_name(channel, &name),
        )
        .await
        {
            warn!(channel_id = %channel, error = %e, "Could not apply preferred name");
        }

        if let Some(limit) = prefs.as_ref().and_then(|p| p.preferred_limit)
            && let Err(e) = with_deadline(
                crate::platform::DEFAULT_DEADLINE,
                self.platform.set_user_limit(channel, Some(limit)),
            )
            .await
        {
            warn!(channel_id = %channel, error = %e, "Could not apply preferred limit");
        }

        let mut deny = PermissionSet::empty();
        if prefs.as_ref().and_then(|p| p.preferred_locked) == Some(true) {
            deny = deny.union(PermissionSet::CONNECT);
        }
        if prefs.as_ref().and_then(|p| p.preferred_hidden) == Some(true) {
            deny = deny.union(PermissionSet::VIEW_CHANNEL);
        }
        if deny != PermissionSet::empty()
            && let Err(e) = with_deadline(
                crate::platform::DEFAULT_DEADLINE,
                self.platform.upsert_overwrite(
                    channel,
                    PermissionOverwrite {
                        target: OverwriteTarget::Role(self.everyone_role()),
                        allow: PermissionSet::empty(),
                        deny,
                    },
                ),
            )
            .await
        {
            warn!(channel_id = %channel, error = %e, "Could not apply lock/hide overwrite");
        }

        // Bans are enforced immediately against whoever is in the room.
        if let Some(ref prefs) = prefs
            && !prefs.banned_users.is_empty()
        {
            let members = self.platform.channel_members(channel).await?;
            for member in members {
                if prefs.banned_users.contains(&member.user_id) {
                    match with_deadline(
                        crate::platform::DEFAULT_DEADLINE,
                        self.platform.disconnect_member(self.guild, member.user_id),
                    )
                    .await
                    {
                        Ok(()) | Err(PlatformError::NotFound) => {}
                        Err(e) => {
                            warn!(user_id = %member.user_id, error = %e, "Could not disconnect banned member")
                        }
                    }
                }
            }
        }

        self.cache
            .set(
                &keys::call_state(channel),
                &CallState::fresh(channel, Some(owner), Utc::now()),
                None,
            )
            .await?;

        Ok(())
    }

    /// Apply the owner's scoped nicknames to the members of one room.
    pub async fn apply_scoped_renames(
        &self,
        owner: UserId,
        channel: ChannelId,
        members: &[Member],
    ) -> Result<(), CoreError> {
        let Some(prefs) = self.prefs_for(owner).await? else {
            return Ok(());
        };

        for member in members {
            if let Some(record) = prefs.rename_for(member.user_id, channel)
                && let Err(e) = with_deadline(
                    crate::platform::DEFAULT_DEADLINE,
                    self.platform.set_nickname(
                        self.guild,
                        member.user_id,
                        Some(&record.scoped_nickname),
                    ),
                )
                .await
            {
                warn!(user_id = %member.user_id, error = %e, "Could not apply scoped nickname");
            }
        }
        Ok(())
    }

    /// Undo a scoped nickname when the user leaves the room it was
    /// scoped to.
    pub async fn restore_nickname(&self, user: UserId, channel: ChannelId) -> Result<(), CoreError> {
        let Some(room) = self.db.channels().get_channel(channel).await? else {
            return Ok(());
        };
        let Some(owner) = room.owner_id else {
            return Ok(());
        };
        let Some(prefs) = self.prefs_for(owner).await? else {
            return Ok(());
        };
        let Some(record) = prefs.rename_for(user, channel) else {
            return Ok(());
        };

        match with_deadline(
            crate::platform::DEFAULT_DEADLINE,
            self.platform
                .set_nickname(self.guild, user, record.original_nickname.as_deref()),
        )
        .await
        {
            Ok(()) | Err(PlatformError::NotFound) => Ok(()),
            Err(e) => {
                warn!(user_id = %user, error = %e, "Could not restore nickname");
                Ok(())
            }
        }
    }

    /// Current call state for a room, or a fresh one.
    async fn call_state_for(
        &self,
        channel: ChannelId,
        owner: Option<UserId>,
    ) -> Result<CallState, CoreError> {
        Ok(self
            .cache
            .get::<CallState>(&keys::call_state(channel))
            .await?
            .unwrap_or_else(|| CallState::fresh(channel, owner, Utc::now())))
    }

    /// The guild-wide everyone role. By platform convention it shares
    /// the guild id.
    fn everyone_role(&self) -> RoleId {
        RoleId(self.guild.0)
    }
}
