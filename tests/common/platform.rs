//! In-memory fake of the chat platform.
//!
//! Holds channels, voice occupancy and guild members; mutations the
//! daemon performs (moves, disconnects) emit the voice transitions the
//! real gateway would, which the harness pumps back into the app.

#![allow(dead_code)]

use atriumd::platform::{
    AuditAction, AuditEntry, ChannelId, ChannelInfo, CreateChannelSpec, Embed, GuildId, Member,
    OverwriteTarget, PermissionOverwrite, Platform, PlatformError, UserId, VoiceTransition,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub struct FakePlatform {
    guild: GuildId,
    next_id: AtomicU64,
    channels: DashMap<ChannelId, ChannelInfo>,
    occupancy: DashMap<ChannelId, Vec<UserId>>,
    members: DashMap<UserId, Member>,
    nicknames: DashMap<UserId, Option<String>>,
    muted: DashMap<UserId, bool>,
    deafened: DashMap<UserId, bool>,
    embeds: Mutex<Vec<(ChannelId, Embed)>>,
    audit: Mutex<Vec<AuditEntry>>,
    audit_fails: AtomicBool,
    pending: Mutex<Vec<VoiceTransition>>,
}

impl FakePlatform {
    pub fn new(guild: GuildId) -> Self {
        Self {
            guild,
            next_id: AtomicU64::new(9_000),
            channels: DashMap::new(),
            occupancy: DashMap::new(),
            members: DashMap::new(),
            nicknames: DashMap::new(),
            muted: DashMap::new(),
            deafened: DashMap::new(),
            embeds: Mutex::new(Vec::new()),
            audit: Mutex::new(Vec::new()),
            audit_fails: AtomicBool::new(false),
            pending: Mutex::new(Vec::new()),
        }
    }

    // ------------------------------------------------------------------
    // Test-side setup and inspection
    // ------------------------------------------------------------------

    pub fn add_member(&self, id: u64, display_name: &str, is_bot: bool, is_admin: bool) {
        self.members.insert(
            UserId(id),
            Member {
                user_id: UserId(id),
                display_name: display_name.to_string(),
                is_bot,
                is_admin,
            },
        );
    }

    pub fn add_channel(&self, id: u64, name: &str, position: i32) {
        self.channels.insert(
            ChannelId(id),
            ChannelInfo {
                id: ChannelId(id),
                guild_id: self.guild,
                name: name.to_string(),
                position,
                user_limit: None,
                overwrites: Vec::new(),
            },
        );
        self.occupancy.insert(ChannelId(id), Vec::new());
    }

    /// Place a user into a channel without emitting an event; the test
    /// injects the matching transition itself.
    pub fn occupy(&self, user: u64, channel: u64) {
        self.vacate(user);
        self.occupancy
            .entry(ChannelId(channel))
            .or_default()
            .push(UserId(user));
    }

    /// Remove a user from wherever they are, without emitting an event.
    pub fn vacate(&self, user: u64) {
        for mut entry in self.occupancy.iter_mut() {
            entry.value_mut().retain(|u| *u != UserId(user));
        }
    }

    pub fn occupant_channel(&self, user: u64) -> Option<ChannelId> {
        self.occupancy
            .iter()
            .find(|e| e.value().contains(&UserId(user)))
            .map(|e| *e.key())
    }

    pub fn channel_exists(&self, id: ChannelId) -> bool {
        self.channels.contains_key(&id)
    }

    pub fn find_channel_by_name(&self, name: &str) -> Option<ChannelInfo> {
        self.channels
            .iter()
            .find(|e| e.value().name == name)
            .map(|e| e.value().clone())
    }

    pub fn channel_info(&self, id: ChannelId) -> Option<ChannelInfo> {
        self.channels.get(&id).map(|e| e.value().clone())
    }

    /// Rename a channel out from under the daemon, as a human would.
    pub fn rename_channel(&self, id: ChannelId, name: &str) -> ChannelInfo {
        let mut entry = self.channels.get_mut(&id).expect("channel exists");
        entry.name = name.to_string();
        entry.clone()
    }

    pub fn seed_overwrite(&self, id: ChannelId, overwrite: PermissionOverwrite) {
        self.channels
            .get_mut(&id)
            .expect("channel exists")
            .overwrites
            .push(overwrite);
    }

    pub fn push_audit(&self, executor: u64, target: ChannelId) {
        self.audit.lock().insert(
            0,
            AuditEntry {
                action: AuditAction::ChannelUpdate,
                executor: UserId(executor),
                target: Some(target),
                at: Utc::now(),
            },
        );
    }

    pub fn fail_audit(&self, fail: bool) {
        self.audit_fails.store(fail, Ordering::SeqCst);
    }

    pub fn is_muted(&self, user: u64) -> bool {
        self.muted.get(&UserId(user)).is_some_and(|v| *v)
    }

    pub fn is_deafened(&self, user: u64) -> bool {
        self.deafened.get(&UserId(user)).is_some_and(|v| *v)
    }

    pub fn nickname(&self, user: u64) -> Option<String> {
        self.nicknames.get(&UserId(user)).and_then(|v| v.clone())
    }

    pub fn sent_embeds(&self) -> Vec<(ChannelId, Embed)> {
        self.embeds.lock().clone()
    }

    /// Transitions emitted by daemon-driven moves/disconnects, in order.
    pub fn drain_events(&self) -> Vec<VoiceTransition> {
        std::mem::take(&mut *self.pending.lock())
    }

    fn emit(&self, user: UserId, from: Option<ChannelId>, to: Option<ChannelId>) {
        self.pending.lock().push(VoiceTransition {
            user_id: user,
            guild_id: self.guild,
            from,
            to,
            at: Utc::now(),
        });
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn create_voice_channel(
        &self,
        spec: CreateChannelSpec,
    ) -> Result<ChannelInfo, PlatformError> {
        let id = ChannelId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let info = ChannelInfo {
            id,
            guild_id: spec.guild_id,
            name: spec.name,
            position: spec.position,
            user_limit: spec.user_limit,
            overwrites: spec.overwrites,
        };
        self.channels.insert(id, info.clone());
        self.occupancy.insert(id, Vec::new());
        Ok(info)
    }

    async fn delete_channel(&self, channel: ChannelId) -> Result<(), PlatformError> {
        if self.channels.remove(&channel).is_none() {
            return Err(PlatformError::NotFound);
        }
        self.occupancy.remove(&channel);
        Ok(())
    }

    async fn set_channel_name(&self, channel: ChannelId, name: &str) -> Result<(), PlatformError> {
        let mut entry = self.channels.get_mut(&channel).ok_or(PlatformError::NotFound)?;
        entry.name = name.to_string();
        Ok(())
    }

    async fn set_channel_position(
        &self,
        channel: ChannelId,
        position: i32,
    ) -> Result<(), PlatformError> {
        let mut entry = self.channels.get_mut(&channel).ok_or(PlatformError::NotFound)?;
        entry.position = position;
        Ok(())
    }

    async fn set_user_limit(
        &self,
        channel: ChannelId,
        limit: Option<u32>,
    ) -> Result<(), PlatformError> {
        let mut entry = self.channels.get_mut(&channel).ok_or(PlatformError::NotFound)?;
        entry.user_limit = limit;
        Ok(())
    }

    async fn upsert_overwrite(
        &self,
        channel: ChannelId,
        overwrite: PermissionOverwrite,
    ) -> Result<(), PlatformError> {
        let mut entry = self.channels.get_mut(&channel).ok_or(PlatformError::NotFound)?;
        entry.overwrites.retain(|ow| ow.target != overwrite.target);
        entry.overwrites.push(overwrite);
        Ok(())
    }

    async fn delete_overwrite(
        &self,
        channel: ChannelId,
        target: OverwriteTarget,
    ) -> Result<(), PlatformError> {
        let mut entry = self.channels.get_mut(&channel).ok_or(PlatformError::NotFound)?;
        entry.overwrites.retain(|ow| ow.target != target);
        Ok(())
    }

    async fn move_member(
        &self,
        _guild: GuildId,
        user: UserId,
        to: ChannelId,
    ) -> Result<(), PlatformError> {
        if !self.channels.contains_key(&to) {
            return Err(PlatformError::NotFound);
        }
        let from = self.occupant_channel(user.0);
        self.vacate(user.0);
        self.occupancy.entry(to).or_default().push(user);
        self.emit(user, from, Some(to));
        Ok(())
    }

    async fn disconnect_member(&self, _guild: GuildId, user: UserId) -> Result<(), PlatformError> {
        let Some(from) = self.occupant_channel(user.0) else {
            return Ok(());
        };
        self.vacate(user.0);
        self.emit(user, Some(from), None);
        Ok(())
    }

    async fn set_mute(
        &self,
        _guild: GuildId,
        user: UserId,
        muted: bool,
    ) -> Result<(), PlatformError> {
        self.muted.insert(user, muted);
        Ok(())
    }

    async fn set_deafen(
        &self,
        _guild: GuildId,
        user: UserId,
        deafened: bool,
    ) -> Result<(), PlatformError> {
        self.deafened.insert(user, deafened);
        Ok(())
    }

    async fn set_nickname(
        &self,
        _guild: GuildId,
        user: UserId,
        nick: Option<&str>,
    ) -> Result<(), PlatformError> {
        self.nicknames.insert(user, nick.map(String::from));
        Ok(())
    }

    async fn send_embed(&self, channel: ChannelId, embed: Embed) -> Result<(), PlatformError> {
        self.embeds.lock().push((channel, embed));
        Ok(())
    }

    async fn fetch_audit_log(
        &self,
        _guild: GuildId,
        action: AuditAction,
        target: ChannelId,
    ) -> Result<Vec<AuditEntry>, PlatformError> {
        if self.audit_fails.load(Ordering::SeqCst) {
            return Err(PlatformError::Transient("audit log unavailable".into()));
        }
        Ok(self
            .audit
            .lock()
            .iter()
            .filter(|e| e.action == action && e.target == Some(target))
            .cloned()
            .collect())
    }

    async fn voice_channels(&self, _guild: GuildId) -> Result<Vec<ChannelInfo>, PlatformError> {
        Ok(self.channels.iter().map(|e| e.value().clone()).collect())
    }

    async fn channel(&self, channel: ChannelId) -> Result<Option<ChannelInfo>, PlatformError> {
        Ok(self.channels.get(&channel).map(|e| e.value().clone()))
    }

    async fn channel_members(&self, channel: ChannelId) -> Result<Vec<Member>, PlatformError> {
        let Some(users) = self.occupancy.get(&channel) else {
            return Ok(Vec::new());
        };
        Ok(users
            .iter()
            .filter_map(|u| self.members.get(u).map(|m| m.value().clone()))
            .collect())
    }

    async fn member(&self, _guild: GuildId, user: UserId) -> Result<Option<Member>, PlatformError> {
        Ok(self.members.get(&user).map(|m| m.value().clone()))
    }
}
