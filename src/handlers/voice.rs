//! Voice-state handler.
//!
//! Decides what a join, leave or move means: spawn-channel entries queue
//! a room create, user-room exits may delete the room or transfer
//! ownership, everything else is session bookkeeping plus preference
//! carry-over. Errors never escape; a user accumulating failures gets a
//! force resync instead.

use crate::cache::{CacheError, CacheHandle, ChannelMember, keys};
use crate::config::RealmConfig;
use crate::db::{Database, RoomRecord};
use crate::dispatch::{EventHandler, UserLocks};
use crate::error::CoreError;
use crate::metrics;
use crate::platform::{
    ChannelId, GatewayEvent, GuildId, Platform, PlatformError, Transition, UserId,
    VoiceTransition, with_deadline,
};
use crate::rooms::{CreateRequest, CreationQueue, JoinerOutcome, OwnershipManager, PreferenceApplicator};
use crate::tracker::SessionTracker;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct VoiceStateHandler {
    guild: GuildId,
    realm: RealmConfig,
    max_errors: u32,
    db: Database,
    cache: CacheHandle,
    platform: Arc<dyn Platform>,
    tracker: Arc<SessionTracker>,
    ownership: Arc<OwnershipManager>,
    prefs: Arc<PreferenceApplicator>,
    create_queue: CreationQueue,
    locks: Arc<UserLocks>,
    error_counts: DashMap<UserId, u32>,
}

impl VoiceStateHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        guild: GuildId,
        realm: RealmConfig,
        max_errors: u32,
        db: Database,
        cache: CacheHandle,
        platform: Arc<dyn Platform>,
        tracker: Arc<SessionTracker>,
        ownership: Arc<OwnershipManager>,
        prefs: Arc<PreferenceApplicator>,
        create_queue: CreationQueue,
        locks: Arc<UserLocks>,
    ) -> Self {
        Self {
            guild,
            realm,
            max_errors,
            db,
            cache,
            platform,
            tracker,
            ownership,
            prefs,
            create_queue,
            locks,
            error_counts: DashMap::new(),
        }
    }

    async fn on_transition(&self, transition: VoiceTransition) {
        let user = transition.user_id;
        let _guard = self.locks.acquire(user).await;

        match self.process(&transition).await {
            Ok(()) => {
                self.error_counts.remove(&user);
            }
            Err(e) => {
                warn!(
                    user_id = %user,
                    error_code = e.error_code(),
                    error = %e,
                    "Voice transition failed"
                );
                metrics::VOICE_ERRORS.inc();

                let failures = {
                    let mut entry = self.error_counts.entry(user).or_insert(0);
                    *entry += 1;
                    *entry
                };
                if failures >= self.max_errors {
                    self.error_counts.remove(&user);
                    info!(user_id = %user, failures = failures, "Error threshold reached, forcing resync");
                    if let Err(e) = self.force_resync(user).await {
                        warn!(user_id = %user, error = %e, "Force resync failed");
                    } else {
                        metrics::FORCE_RESYNCS.inc();
                    }
                }
            }
        }
    }

    async fn process(&self, transition: &VoiceTransition) -> Result<(), CoreError> {
        if transition.guild_id != self.guild {
            return Ok(());
        }
        if let Some(member) = self.platform.member(self.guild, transition.user_id).await?
            && member.is_bot
        {
            return Ok(());
        }

        let user = transition.user_id;
        let at = transition.at;
        match transition.classify() {
            Transition::Join(to) => self.on_join(user, to, at).await,
            Transition::Leave(from) => self.on_leave(user, from, at).await,
            Transition::Move { from, to } => {
                self.on_leave(user, from, at).await?;
                self.on_join(user, to, at).await
            }
            Transition::Ignored => Ok(()),
        }
    }

    async fn on_join(
        &self,
        user: UserId,
        to: ChannelId,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        if self.realm.is_spawn(to) {
            // Presence in the doorway is never a session.
            self.create_queue.enqueue(CreateRequest {
                user_id: user,
                spawn_id: to,
            });
            metrics::ROOMS_REQUESTED.inc();
            return Ok(());
        }

        let Some(info) = self.platform.channel(to).await? else {
            debug!(channel_id = %to, "Joined channel vanished mid-flight");
            return Ok(());
        };

        self.tracker
            .track_join(user, self.guild, to, &info.name, at)
            .await?;
        if self.tracker.is_tracked(to, &info.name) {
            self.member_cache_add(to, user, at).await?;
        }

        if self.realm.is_excluded(to) {
            return Ok(());
        }

        let Some(room) = self.db.channels().get_channel(to).await? else {
            return Ok(());
        };
        if !room.is_user_room || !room.active {
            return Ok(());
        }

        let outcome = self.prefs.apply_new_joiner(user, &room).await?;
        if outcome == JoinerOutcome::Disconnected {
            // The disconnect produces its own LEAVE, which closes the session.
            return Ok(());
        }

        if room.owner_id.is_none() {
            self.ownership.sync_channel_ownership(to).await?;
        }
        Ok(())
    }

    async fn on_leave(
        &self,
        user: UserId,
        from: ChannelId,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        if self.realm.is_spawn(from) {
            return Ok(());
        }

        let info = self.platform.channel(from).await?;
        let row = self.db.channels().get_channel(from).await?;
        let name = info
            .as_ref()
            .map(|i| i.name.clone())
            .or_else(|| row.as_ref().map(|r| r.name.clone()))
            .unwrap_or_default();

        self.tracker.track_leave(user, from, &name, at).await?;
        self.member_cache_remove(from, user).await?;

        if self.realm.is_excluded(from) {
            return Ok(());
        }

        let Some(room) = row else {
            return Ok(());
        };
        if !room.is_user_room || !room.active {
            return Ok(());
        }

        self.prefs.restore_nickname(user, from).await?;

        let members = if info.is_some() {
            self.platform.channel_members(from).await?
        } else {
            Vec::new()
        };
        self.db
            .channels()
            .set_member_count(from, members.len() as i64)
            .await?;

        if members.is_empty() {
            self.delete_room(&room).await?;
        } else if room.owner_id == Some(user) {
            self.ownership.handle_owner_left(&room, &members, at).await?;
        }
        Ok(())
    }

    async fn delete_room(&self, room: &RoomRecord) -> Result<(), CoreError> {
        match with_deadline(
            crate::platform::DEFAULT_DEADLINE,
            self.platform.delete_channel(room.id),
        )
        .await
        {
            Ok(()) | Err(PlatformError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        self.db.channels().delete_channel(room.id).await?;
        self.cache.delete(&keys::channel_owner(room.id)).await?;
        self.cache.delete(&keys::call_state(room.id)).await?;
        self.cache.delete(&keys::channel_members(room.id)).await?;
        self.cache.delete(&keys::coup(room.id)).await?;

        metrics::ROOMS_DELETED.inc();
        info!(channel_id = %room.id, "Empty user room deleted");
        Ok(())
    }

    /// Re-derive one user's session state from live platform membership.
    ///
    /// Runs under the caller's per-user lock, so it cannot interleave
    /// with an in-flight transition for the same user.
    async fn force_resync(&self, user: UserId) -> Result<(), CoreError> {
        let now = Utc::now();

        let mut present: Option<(ChannelId, String)> = None;
        for channel in self.platform.voice_channels(self.guild).await? {
            if !self.tracker.is_tracked(channel.id, &channel.name) {
                continue;
            }
            let members = self.platform.channel_members(channel.id).await?;
            if members.iter().any(|m| m.user_id == user) {
                present = Some((channel.id, channel.name));
                break;
            }
        }

        let open = self
            .db
            .sessions()
            .open_session_for_user(user, self.guild)
            .await?;

        match (present, open) {
            (Some((channel, _)), Some(ref session)) if session.channel_id == channel => {}
            (Some((channel, name)), _) => {
                self.tracker
                    .track_join(user, self.guild, channel, &name, now)
                    .await?;
            }
            (None, Some(session)) => {
                self.db
                    .sessions()
                    .close_session(user, session.channel_id, now)
                    .await?;
            }
            (None, None) => {}
        }

        info!(user_id = %user, "Force resync complete");
        Ok(())
    }

    async fn member_cache_add(
        &self,
        channel: ChannelId,
        user: UserId,
        at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let key = keys::channel_members(channel);
        let mut set: Vec<ChannelMember> = self.cache.get(&key).await?.unwrap_or_default();
        if !set.iter().any(|m| m.user_id == user) {
            set.push(ChannelMember {
                user_id: user,
                joined_at: at,
            });
            self.cache.set(&key, &set, None).await?;
        }
        Ok(())
    }

    async fn member_cache_remove(&self, channel: ChannelId, user: UserId) -> Result<(), CacheError> {
        let key = keys::channel_members(channel);
        let Some(mut set) = self.cache.get::<Vec<ChannelMember>>(&key).await? else {
            return Ok(());
        };
        set.retain(|m| m.user_id != user);
        if set.is_empty() {
            self.cache.delete(&key).await
        } else {
            self.cache.set(&key, &set, None).await
        }
    }
}

#[async_trait]
impl EventHandler for VoiceStateHandler {
    async fn handle(&self, event: GatewayEvent) {
        if let GatewayEvent::VoiceState(transition) = event {
            self.on_transition(transition).await;
        }
    }
}
