//! Reconciler: periodic drift repair.
//!
//! The gateway drops events; processes restart mid-transition. Every
//! tick this task walks the realm's live voice rooms and re-aligns the
//! store with them: channel rows, missing and orphaned sessions,
//! duplicate actives, member counts, ownership. The platform's current
//! state always wins.

use crate::cache::{CacheHandle, ChannelMember, keys};
use crate::config::RealmConfig;
use crate::db::{Database, RoomRecord};
use crate::error::CoreError;
use crate::metrics;
use crate::platform::{ChannelId, ChannelInfo, GuildId, Member, Platform};
use crate::rooms::OwnershipManager;
use crate::tracker::SessionTracker;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// What one pass repaired.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub channels: usize,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub duplicates_closed: u64,
    pub count_syncs: u64,
    pub ownership_repairs: u64,
    pub rooms_retired: u64,
}

impl ReconcileReport {
    fn repaired_anything(&self) -> bool {
        self.sessions_opened > 0
            || self.sessions_closed > 0
            || self.duplicates_closed > 0
            || self.count_syncs > 0
            || self.ownership_repairs > 0
            || self.rooms_retired > 0
    }
}

pub struct Reconciler {
    guild: GuildId,
    realm: RealmConfig,
    db: Database,
    cache: CacheHandle,
    platform: Arc<dyn Platform>,
    ownership: Arc<OwnershipManager>,
    tracker: Arc<SessionTracker>,
    running: AtomicBool,
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        guild: GuildId,
        realm: RealmConfig,
        db: Database,
        cache: CacheHandle,
        platform: Arc<dyn Platform>,
        ownership: Arc<OwnershipManager>,
        tracker: Arc<SessionTracker>,
    ) -> Self {
        Self {
            guild,
            realm,
            db,
            cache,
            platform,
            ownership,
            tracker,
            running: AtomicBool::new(false),
        }
    }

    /// Run one pass, unless the previous one is still executing.
    pub async fn run_once(&self) -> Result<Option<ReconcileReport>, CoreError> {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Reconciler still running, tick skipped");
            return Ok(None);
        }
        let result = self.pass().await;
        self.running.store(false, Ordering::SeqCst);

        match &result {
            Ok(report) if report.repaired_anything() => {
                info!(
                    opened = report.sessions_opened,
                    closed = report.sessions_closed,
                    duplicates = report.duplicates_closed,
                    count_syncs = report.count_syncs,
                    ownership = report.ownership_repairs,
                    retired = report.rooms_retired,
                    "Reconcile pass repaired drift"
                );
            }
            Ok(report) => {
                debug!(channels = report.channels, "Reconcile pass clean");
            }
            Err(_) => {}
        }
        result.map(Some)
    }

    async fn pass(&self) -> Result<ReconcileReport, CoreError> {
        let now = Utc::now();
        let mut report = ReconcileReport::default();

        // Duplicate actives can only come from store tampering; sweep the
        // whole realm once per pass.
        report.duplicates_closed = self
            .db
            .sessions()
            .cleanup_duplicate_active(self.guild, now)
            .await?;

        let live = self.platform.voice_channels(self.guild).await?;
        let live_ids: HashSet<ChannelId> = live.iter().map(|c| c.id).collect();

        for channel in &live {
            if self.realm.is_spawn(channel.id) {
                continue;
            }
            report.channels += 1;
            self.reconcile_channel(channel, now, &mut report).await?;
        }

        self.close_stray_sessions(&live_ids, now, &mut report).await?;
        self.retire_dead_rooms(&live_ids, &mut report).await?;

        metrics::SESSIONS_REPAIRED.inc_by(report.sessions_opened + report.sessions_closed);
        metrics::ACTIVE_ROOMS.set(self.db.channels().user_room_count(self.guild).await?);
        metrics::OPEN_SESSIONS.set(self.db.sessions().all_active_sessions().await?.len() as i64);

        Ok(report)
    }

    async fn reconcile_channel(
        &self,
        channel: &ChannelInfo,
        now: DateTime<Utc>,
        report: &mut ReconcileReport,
    ) -> Result<(), CoreError> {
        let members: Vec<Member> = self
            .platform
            .channel_members(channel.id)
            .await?
            .into_iter()
            .filter(|m| !m.is_bot)
            .collect();

        let row = self.db.channels().get_channel(channel.id).await?;
        let record = RoomRecord {
            id: channel.id,
            guild_id: self.guild,
            name: channel.name.clone(),
            position: channel.position,
            is_user_room: row.as_ref().is_some_and(|r| r.is_user_room),
            spawn_id: row.as_ref().and_then(|r| r.spawn_id),
            owner_id: row.as_ref().and_then(|r| r.owner_id),
            owner_since: row.as_ref().and_then(|r| r.owner_since),
            previous_owner_id: row.as_ref().and_then(|r| r.previous_owner_id),
            active: true,
            member_count: members.len() as i64,
        };
        self.db.channels().upsert_channel(&record).await?;

        if !self.tracker.is_tracked(channel.id, &channel.name) {
            return Ok(());
        }

        self.merge_member_cache(channel.id, &members, now).await?;

        let open = self
            .db
            .sessions()
            .active_sessions_in_channel(channel.id)
            .await?;

        // Missing: a member with no open session here gets one stamped now.
        for member in &members {
            if open.iter().any(|s| s.user_id == member.user_id) {
                continue;
            }
            match self
                .db
                .sessions()
                .open_session(member.user_id, self.guild, channel.id, &channel.name, now)
                .await
            {
                Ok(()) => {
                    debug!(user_id = %member.user_id, channel_id = %channel.id, "Opened missing session");
                    report.sessions_opened += 1;
                }
                // A concurrent JOIN handler won the race.
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e.into()),
            }
        }

        // Orphaned: an open session whose user is gone closes now.
        for session in &open {
            if members.iter().any(|m| m.user_id == session.user_id) {
                continue;
            }
            self.db
                .sessions()
                .close_session(session.user_id, channel.id, now)
                .await?;
            debug!(user_id = %session.user_id, channel_id = %channel.id, "Closed orphaned session");
            report.sessions_closed += 1;
        }

        // Member-count drift means the canonical list needs a rewrite.
        let active_count = self.db.sessions().active_members_count(channel.id).await?;
        if active_count != members.len() as i64 {
            let member_ids: Vec<_> = members.iter().map(|m| m.user_id).collect();
            self.db
                .sessions()
                .sync_channel_active_users(self.guild, channel.id, &channel.name, &member_ids, now)
                .await?;
            self.db
                .channels()
                .set_member_count(channel.id, members.len() as i64)
                .await?;
            report.count_syncs += 1;
        }

        // Ownership last; read-only rooms keep their presence bookkeeping
        // but are never mutated.
        if record.is_user_room && !self.realm.is_excluded(channel.id) {
            let owner_present = record
                .owner_id
                .is_some_and(|owner| members.iter().any(|m| m.user_id == owner));
            if !owner_present && self.ownership.sync_channel_ownership(channel.id).await? {
                report.ownership_repairs += 1;
            }
        }

        Ok(())
    }

    /// Close open sessions pointing at channels that no longer exist,
    /// belong to a foreign guild, or are never tracked.
    async fn close_stray_sessions(
        &self,
        live_ids: &HashSet<ChannelId>,
        now: DateTime<Utc>,
        report: &mut ReconcileReport,
    ) -> Result<(), CoreError> {
        for session in self.db.sessions().all_active_sessions().await? {
            let stray = session.guild_id != self.guild
                || !live_ids.contains(&session.channel_id)
                || !self
                    .tracker
                    .is_tracked(session.channel_id, &session.channel_name);
            if stray {
                self.db
                    .sessions()
                    .close_session(session.user_id, session.channel_id, now)
                    .await?;
                debug!(
                    user_id = %session.user_id,
                    channel_id = %session.channel_id,
                    "Closed stray session"
                );
                report.sessions_closed += 1;
            }
        }
        Ok(())
    }

    /// Rows still marked active for channels the platform no longer has.
    async fn retire_dead_rooms(
        &self,
        live_ids: &HashSet<ChannelId>,
        report: &mut ReconcileReport,
    ) -> Result<(), CoreError> {
        for row in self.db.channels().active_channels(self.guild).await? {
            if live_ids.contains(&row.id) {
                continue;
            }
            self.db.channels().delete_channel(row.id).await?;
            self.cache.delete(&keys::channel_owner(row.id)).await?;
            self.cache.delete(&keys::call_state(row.id)).await?;
            self.cache.delete(&keys::channel_members(row.id)).await?;
            self.cache.delete(&keys::coup(row.id)).await?;
            debug!(channel_id = %row.id, "Retired dead channel row");
            report.rooms_retired += 1;
        }
        Ok(())
    }

    /// Merge live membership into the cached member set: keep observed
    /// join times for people still present, stamp newcomers with now,
    /// drop the departed.
    async fn merge_member_cache(
        &self,
        channel: ChannelId,
        members: &[Member],
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let key = keys::channel_members(channel);
        let cached: Vec<ChannelMember> = self.cache.get(&key).await?.unwrap_or_default();

        let merged: Vec<ChannelMember> = members
            .iter()
            .map(|m| {
                cached
                    .iter()
                    .find(|c| c.user_id == m.user_id)
                    .copied()
                    .unwrap_or(ChannelMember {
                        user_id: m.user_id,
                        joined_at: now,
                    })
            })
            .collect();

        if merged.is_empty() {
            self.cache.delete(&key).await?;
        } else {
            self.cache.set(&key, &merged, None).await?;
        }
        Ok(())
    }
}
