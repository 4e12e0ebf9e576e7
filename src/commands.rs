//! Core operations behind the slash-command surface.
//!
//! The command layer itself lives outside this crate; it calls these
//! methods and relays the reply. Owner-gated mutations consult the
//! per-(user, action) rate limiter, append moderation history, keep the
//! call-state shadow current and invalidate cached preferences.

use crate::cache::{CacheHandle, CallState, keys};
use crate::config::RealmConfig;
use crate::db::{Database, ModAction, ModHistoryEntry, RenameRecord, RoomRecord};
use crate::error::CommandError;
use crate::platform::{
    ChannelId, GuildId, Member, OverwriteTarget, PermissionOverwrite, PermissionSet, Platform,
    PlatformError, RoleId, UserId, with_deadline,
};
use crate::rooms::{CoupManager, CoupOutcome, OwnershipManager};
use crate::security::RateLimiter;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

/// Successful command result with the user-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub message: String,
}

impl CommandReply {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type CommandResult = Result<CommandReply, CommandError>;

pub struct CommandService {
    guild: GuildId,
    realm: RealmConfig,
    db: Database,
    cache: CacheHandle,
    platform: Arc<dyn Platform>,
    ownership: Arc<OwnershipManager>,
    coups: Arc<CoupManager>,
    rate: RateLimiter,
}

impl CommandService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        guild: GuildId,
        realm: RealmConfig,
        db: Database,
        cache: CacheHandle,
        platform: Arc<dyn Platform>,
        ownership: Arc<OwnershipManager>,
        coups: Arc<CoupManager>,
        rate: RateLimiter,
    ) -> Self {
        Self {
            guild,
            realm,
            db,
            cache,
            platform,
            ownership,
            coups,
            rate,
        }
    }

    // ========================================================================
    // Room setup
    // ========================================================================

    pub async fn rename(&self, caller: UserId, channel: ChannelId, name: &str) -> CommandResult {
        let name = name.trim();
        if name.is_empty() {
            return Err(CommandError::Refused("the room needs a name".into()));
        }
        self.owned_room(channel, caller).await?;
        self.consume(caller, "rename").await?;

        with_deadline(
            crate::platform::RENAME_DEADLINE,
            self.platform.set_channel_name(channel, name),
        )
        .await?;

        let stored = name.to_string();
        self.db
            .prefs()
            .update_owner_prefs(caller, self.guild, |p| {
                p.preferred_name = Some(stored);
            })
            .await?;
        self.cache.invalidate_user_prefs(caller, self.guild).await?;

        Ok(CommandReply::new(format!("Room renamed to {name}")))
    }

    pub async fn set_limit(
        &self,
        caller: UserId,
        channel: ChannelId,
        limit: Option<u32>,
    ) -> CommandResult {
        self.owned_room(channel, caller).await?;
        self.consume(caller, "limit").await?;

        with_deadline(
            crate::platform::DEFAULT_DEADLINE,
            self.platform.set_user_limit(channel, limit),
        )
        .await?;

        self.db
            .prefs()
            .update_owner_prefs(caller, self.guild, |p| {
                p.preferred_limit = limit;
            })
            .await?;
        self.cache.invalidate_user_prefs(caller, self.guild).await?;

        Ok(match limit {
            Some(n) => CommandReply::new(format!("User limit set to {n}")),
            None => CommandReply::new("User limit removed"),
        })
    }

    pub async fn lock(&self, caller: UserId, channel: ChannelId) -> CommandResult {
        self.set_gate(caller, channel, "lock", Some(true), None).await?;
        Ok(CommandReply::new("Room locked"))
    }

    pub async fn unlock(&self, caller: UserId, channel: ChannelId) -> CommandResult {
        self.set_gate(caller, channel, "lock", Some(false), None).await?;
        Ok(CommandReply::new("Room unlocked"))
    }

    pub async fn hide(&self, caller: UserId, channel: ChannelId) -> CommandResult {
        self.set_gate(caller, channel, "hide", None, Some(true)).await?;
        Ok(CommandReply::new("Room hidden"))
    }

    pub async fn reveal(&self, caller: UserId, channel: ChannelId) -> CommandResult {
        self.set_gate(caller, channel, "hide", None, Some(false)).await?;
        Ok(CommandReply::new("Room visible again"))
    }

    // ========================================================================
    // Member moderation
    // ========================================================================

    pub async fn mute(&self, caller: UserId, channel: ChannelId, target: UserId) -> CommandResult {
        self.moderate_member(caller, channel, target, ModAction::Mute)
            .await?;
        Ok(CommandReply::new("Muted"))
    }

    pub async fn unmute(
        &self,
        caller: UserId,
        channel: ChannelId,
        target: UserId,
    ) -> CommandResult {
        self.moderate_member(caller, channel, target, ModAction::Unmute)
            .await?;
        Ok(CommandReply::new("Unmuted"))
    }

    pub async fn deafen(
        &self,
        caller: UserId,
        channel: ChannelId,
        target: UserId,
    ) -> CommandResult {
        self.moderate_member(caller, channel, target, ModAction::Deafen)
            .await?;
        Ok(CommandReply::new("Deafened"))
    }

    pub async fn undeafen(
        &self,
        caller: UserId,
        channel: ChannelId,
        target: UserId,
    ) -> CommandResult {
        self.moderate_member(caller, channel, target, ModAction::Undeafen)
            .await?;
        Ok(CommandReply::new("Undeafened"))
    }

    pub async fn kick(&self, caller: UserId, channel: ChannelId, target: UserId) -> CommandResult {
        self.owned_room(channel, caller).await?;
        self.require_in_room(channel, target).await?;
        self.consume(caller, "kick").await?;

        match with_deadline(
            crate::platform::DEFAULT_DEADLINE,
            self.platform.disconnect_member(self.guild, target),
        )
        .await
        {
            Ok(()) | Err(PlatformError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        self.db
            .prefs()
            .update_owner_prefs(caller, self.guild, |p| {
                if !p.kicked_users.contains(&target) {
                    p.kicked_users.push(target);
                }
            })
            .await?;
        self.cache.invalidate_user_prefs(caller, self.guild).await?;
        self.update_call_state(channel, caller, |state| {
            if !state.kicked_users.contains(&target) {
                state.kicked_users.push(target);
            }
        })
        .await?;
        self.record(caller, ModAction::Kick, Some(target), channel).await?;

        Ok(CommandReply::new("Kicked"))
    }

    pub async fn ban(&self, caller: UserId, channel: ChannelId, target: UserId) -> CommandResult {
        self.owned_room(channel, caller).await?;
        self.consume(caller, "ban").await?;

        self.db
            .prefs()
            .update_owner_prefs(caller, self.guild, |p| {
                if !p.banned_users.contains(&target) {
                    p.banned_users.push(target);
                }
            })
            .await?;
        self.cache.invalidate_user_prefs(caller, self.guild).await?;

        // Enforce immediately if they are in the room.
        let present = self
            .platform
            .channel_members(channel)
            .await?
            .iter()
            .any(|m| m.user_id == target);
        if present {
            match with_deadline(
                crate::platform::DEFAULT_DEADLINE,
                self.platform.disconnect_member(self.guild, target),
            )
            .await
            {
                Ok(()) | Err(PlatformError::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.record(caller, ModAction::Ban, Some(target), channel).await?;
        Ok(CommandReply::new("Banned from your rooms"))
    }

    pub async fn unban(&self, caller: UserId, channel: ChannelId, target: UserId) -> CommandResult {
        self.owned_room(channel, caller).await?;
        self.consume(caller, "ban").await?;

        self.db
            .prefs()
            .update_owner_prefs(caller, self.guild, |p| {
                p.banned_users.retain(|u| *u != target);
            })
            .await?;
        self.cache.invalidate_user_prefs(caller, self.guild).await?;
        self.record(caller, ModAction::Unban, Some(target), channel).await?;

        Ok(CommandReply::new("Unbanned"))
    }

    pub async fn rename_user(
        &self,
        caller: UserId,
        channel: ChannelId,
        target: UserId,
        nickname: &str,
    ) -> CommandResult {
        let nickname = nickname.trim();
        if nickname.is_empty() {
            return Err(CommandError::Refused("the nickname cannot be empty".into()));
        }
        self.owned_room(channel, caller).await?;
        self.require_in_room(channel, target).await?;
        self.consume(caller, "rename_user").await?;

        let original = self
            .platform
            .member(self.guild, target)
            .await?
            .map(|m| m.display_name);

        with_deadline(
            crate::platform::DEFAULT_DEADLINE,
            self.platform.set_nickname(self.guild, target, Some(nickname)),
        )
        .await?;

        let record = RenameRecord {
            user_id: target,
            original_nickname: original,
            scoped_nickname: nickname.to_string(),
            channel_id: channel,
            renamed_at: Utc::now(),
        };
        self.db
            .prefs()
            .update_owner_prefs(caller, self.guild, |p| {
                p.renamed_users
                    .retain(|r| !(r.user_id == target && r.channel_id == channel));
                p.renamed_users.push(record);
            })
            .await?;
        self.cache.invalidate_user_prefs(caller, self.guild).await?;
        self.record(caller, ModAction::RenameUser, Some(target), channel)
            .await?;

        Ok(CommandReply::new(format!("They go by {nickname} in here now")))
    }

    // ========================================================================
    // Ownership
    // ========================================================================

    pub async fn transfer(
        &self,
        caller: UserId,
        channel: ChannelId,
        target: UserId,
    ) -> CommandResult {
        self.owned_room(channel, caller).await?;
        self.require_in_room(channel, target).await?;
        self.consume(caller, "transfer").await?;

        with_deadline(
            crate::platform::DEFAULT_DEADLINE,
            self.platform
                .upsert_overwrite(channel, PermissionOverwrite::owner(target)),
        )
        .await?;
        self.ownership
            .set_owner(channel, target, Utc::now())
            .await
            .map_err(CommandError::Internal)?;
        self.record(caller, ModAction::Transfer, Some(target), channel)
            .await?;

        info!(channel_id = %channel, from = %caller, to = %target, "Ownership transferred by command");
        Ok(CommandReply::new("The room is theirs now"))
    }

    pub async fn claim(&self, caller: UserId, channel: ChannelId) -> CommandResult {
        let room = self.user_room(channel).await?;
        let members = self.platform.channel_members(channel).await?;
        if !members.iter().any(|m| m.user_id == caller) {
            return Err(CommandError::TargetNotInRoom);
        }

        if let Some(owner) = room.owner_id
            && members.iter().any(|m| m.user_id == owner)
        {
            return Err(CommandError::Refused("this room already has an owner".into()));
        }
        self.consume(caller, "claim").await?;

        with_deadline(
            crate::platform::DEFAULT_DEADLINE,
            self.platform
                .upsert_overwrite(channel, PermissionOverwrite::owner(caller)),
        )
        .await?;
        self.ownership
            .set_owner(channel, caller, Utc::now())
            .await
            .map_err(CommandError::Internal)?;

        Ok(CommandReply::new("The room is yours"))
    }

    pub async fn coup_start(&self, caller: UserId, channel: ChannelId) -> CommandResult {
        self.consume(caller, "coup").await?;
        match self.coups.start(channel, caller).await? {
            CoupOutcome::Executed => Ok(CommandReply::new("The room is yours")),
            CoupOutcome::Pending { votes, needed } => Ok(CommandReply::new(format!(
                "Coup started: {votes}/{needed} votes"
            ))),
        }
    }

    pub async fn coup_vote(&self, caller: UserId, channel: ChannelId) -> CommandResult {
        match self.coups.vote(channel, caller).await? {
            CoupOutcome::Executed => Ok(CommandReply::new("The coup succeeded")),
            CoupOutcome::Pending { votes, needed } => {
                Ok(CommandReply::new(format!("Vote counted: {votes}/{needed}")))
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// A live, mutable user-room.
    async fn user_room(&self, channel: ChannelId) -> Result<RoomRecord, CommandError> {
        let room = self
            .db
            .channels()
            .get_channel(channel)
            .await?
            .filter(|r| r.active && r.is_user_room)
            .ok_or(CommandError::NoSuchRoom)?;
        if self.realm.is_excluded(channel) {
            return Err(CommandError::ReadOnlyRoom);
        }
        Ok(room)
    }

    /// A live user-room owned by the caller.
    async fn owned_room(
        &self,
        channel: ChannelId,
        caller: UserId,
    ) -> Result<RoomRecord, CommandError> {
        let room = self.user_room(channel).await?;
        if room.owner_id != Some(caller) {
            return Err(CommandError::NotOwner);
        }
        Ok(room)
    }

    async fn require_in_room(
        &self,
        channel: ChannelId,
        user: UserId,
    ) -> Result<Vec<Member>, CommandError> {
        let members = self.platform.channel_members(channel).await?;
        if !members.iter().any(|m| m.user_id == user) {
            return Err(CommandError::TargetNotInRoom);
        }
        Ok(members)
    }

    /// Take one token from the caller's window or refuse.
    async fn consume(&self, caller: UserId, action: &'static str) -> Result<(), CommandError> {
        if !self.rate.check(caller, action).await? {
            return Err(CommandError::RateLimited { action });
        }
        Ok(())
    }

    async fn record(
        &self,
        owner: UserId,
        action: ModAction,
        target: Option<UserId>,
        channel: ChannelId,
    ) -> Result<(), CommandError> {
        self.db
            .mod_history()
            .append(
                owner,
                self.guild,
                ModHistoryEntry {
                    action,
                    target_user_id: target,
                    channel_id: Some(channel),
                    reason: None,
                    at: Utc::now(),
                },
            )
            .await?;
        Ok(())
    }

    async fn update_call_state<F>(
        &self,
        channel: ChannelId,
        owner: UserId,
        f: F,
    ) -> Result<(), CommandError>
    where
        F: FnOnce(&mut CallState),
    {
        let key = keys::call_state(channel);
        let mut state = self
            .cache
            .get::<CallState>(&key)
            .await?
            .unwrap_or_else(|| CallState::fresh(channel, Some(owner), Utc::now()));
        f(&mut state);
        state.last_updated = Utc::now();
        self.cache.set(&key, &state, None).await?;
        Ok(())
    }

    /// Shared body of mute/unmute/deafen/undeafen.
    async fn moderate_member(
        &self,
        caller: UserId,
        channel: ChannelId,
        target: UserId,
        action: ModAction,
    ) -> Result<(), CommandError> {
        self.owned_room(channel, caller).await?;
        self.require_in_room(channel, target).await?;
        let rate_key = match action {
            ModAction::Mute | ModAction::Unmute => "mute",
            _ => "deafen",
        };
        self.consume(caller, rate_key).await?;

        let engage = matches!(action, ModAction::Mute | ModAction::Deafen);
        match action {
            ModAction::Mute | ModAction::Unmute => {
                with_deadline(
                    crate::platform::DEFAULT_DEADLINE,
                    self.platform.set_mute(self.guild, target, engage),
                )
                .await?
            }
            _ => {
                with_deadline(
                    crate::platform::DEFAULT_DEADLINE,
                    self.platform.set_deafen(self.guild, target, engage),
                )
                .await?
            }
        }

        self.db
            .prefs()
            .update_owner_prefs(caller, self.guild, |p| {
                let list = match action {
                    ModAction::Mute | ModAction::Unmute => &mut p.muted_users,
                    _ => &mut p.deafened_users,
                };
                if engage {
                    if !list.contains(&target) {
                        list.push(target);
                    }
                } else {
                    list.retain(|u| *u != target);
                }
            })
            .await?;
        self.cache.invalidate_user_prefs(caller, self.guild).await?;

        self.update_call_state(channel, caller, |state| {
            let list = match action {
                ModAction::Mute | ModAction::Unmute => &mut state.muted_users,
                _ => &mut state.deafened_users,
            };
            if engage {
                if !list.contains(&target) {
                    list.push(target);
                }
            } else {
                list.retain(|u| *u != target);
            }
        })
        .await?;

        self.record(caller, action, Some(target), channel).await?;
        Ok(())
    }

    /// Shared body of lock/unlock/hide/reveal: persist the flag, then
    /// re-derive the everyone-role overwrite from the stored pair.
    async fn set_gate(
        &self,
        caller: UserId,
        channel: ChannelId,
        action: &'static str,
        locked: Option<bool>,
        hidden: Option<bool>,
    ) -> Result<(), CommandError> {
        self.owned_room(channel, caller).await?;
        self.consume(caller, action).await?;

        let prefs = self
            .db
            .prefs()
            .update_owner_prefs(caller, self.guild, |p| {
                if let Some(locked) = locked {
                    p.preferred_locked = Some(locked);
                }
                if let Some(hidden) = hidden {
                    p.preferred_hidden = Some(hidden);
                }
            })
            .await?;
        self.cache.invalidate_user_prefs(caller, self.guild).await?;

        let mut deny = PermissionSet::empty();
        if prefs.preferred_locked == Some(true) {
            deny = deny.union(PermissionSet::CONNECT);
        }
        if prefs.preferred_hidden == Some(true) {
            deny = deny.union(PermissionSet::VIEW_CHANNEL);
        }

        let target = OverwriteTarget::Role(RoleId(self.guild.0));
        if deny == PermissionSet::empty() {
            match with_deadline(
                crate::platform::DEFAULT_DEADLINE,
                self.platform.delete_overwrite(channel, target),
            )
            .await
            {
                Ok(()) | Err(PlatformError::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
        } else {
            with_deadline(
                crate::platform::DEFAULT_DEADLINE,
                self.platform.upsert_overwrite(
                    channel,
                    PermissionOverwrite {
                        target,
                        allow: PermissionSet::empty(),
                        deny,
                    },
                ),
            )
            .await?;
        }
        Ok(())
    }
}
