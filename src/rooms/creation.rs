//! Room creation queue.
//!
//! A single consumer serialises room creates per guild: the cap check,
//! name/position/permission seeding, the move-in, the owner record, and
//! the spacing sleep between successive creates all live here. The
//! spawn-channel trigger only enqueues.

use super::ownership::OwnershipManager;
use super::prefs::PreferenceApplicator;
use crate::cache::{CacheHandle, ChannelMember, keys};
use crate::config::RoomsConfig;
use crate::db::{Database, RoomRecord};
use crate::error::CoreError;
use crate::platform::{
    ChannelId, CreateChannelSpec, Embed, GuildId, OverwriteTarget, PermissionOverwrite,
    PermissionSet, Platform, UserId, with_deadline,
};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long to wait before re-checking the room cap.
const CAP_PAUSE: Duration = Duration::from_secs(5);

/// Settle time between creating a room and applying preferences.
const SETTLE: Duration = Duration::from_secs(1);

/// A queued room-create for one user.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub user_id: UserId,
    pub spawn_id: ChannelId,
}

/// Handle used by the voice handler to enqueue creates.
#[derive(Clone)]
pub struct CreationQueue {
    tx: mpsc::UnboundedSender<CreateRequest>,
}

impl CreationQueue {
    pub fn enqueue(&self, request: CreateRequest) {
        if self.tx.send(request).is_err() {
            debug!("Create request dropped, worker stopped");
        }
    }
}

/// The single consumer that performs creates.
pub struct RoomCreator {
    guild: GuildId,
    rooms: RoomsConfig,
    db: Database,
    cache: CacheHandle,
    platform: Arc<dyn Platform>,
    prefs: Arc<PreferenceApplicator>,
    ownership: Arc<OwnershipManager>,
}

impl RoomCreator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        guild: GuildId,
        rooms: RoomsConfig,
        db: Database,
        cache: CacheHandle,
        platform: Arc<dyn Platform>,
        prefs: Arc<PreferenceApplicator>,
        ownership: Arc<OwnershipManager>,
    ) -> Self {
        Self {
            guild,
            rooms,
            db,
            cache,
            platform,
            prefs,
            ownership,
        }
    }

    /// Spawn the worker; returns the enqueue handle and the task.
    pub fn start(self, shutdown: broadcast::Receiver<()>) -> (CreationQueue, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(self.run(rx, shutdown));
        (CreationQueue { tx }, handle)
    }

    async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<CreateRequest>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let spacing = Duration::from_millis(self.rooms.room_creation_delay_ms);
        let mut pending: VecDeque<CreateRequest> = VecDeque::new();

        loop {
            while let Ok(request) = rx.try_recv() {
                pending.push_back(request);
            }

            let request = match pending.pop_front() {
                Some(request) => request,
                None => tokio::select! {
                    maybe = rx.recv() => match maybe {
                        Some(request) => request,
                        None => break,
                    },
                    _ = shutdown.recv() => break,
                },
            };

            match self.db.channels().user_room_count(self.guild).await {
                Ok(count) if count as usize >= self.rooms.max_concurrent_rooms => {
                    warn!(
                        count = count,
                        cap = self.rooms.max_concurrent_rooms,
                        "Room cap reached, creation paused"
                    );
                    pending.push_front(request);
                    tokio::select! {
                        _ = tokio::time::sleep(CAP_PAUSE) => continue,
                        _ = shutdown.recv() => break,
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Could not count user rooms, skipping create");
                    continue;
                }
            }

            if let Err(e) = self.create_room(&request).await {
                warn!(user_id = %request.user_id, error = %e, "Room creation failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(spacing) => {}
                _ = shutdown.recv() => break,
            }
        }
        debug!("Room creation worker stopped");
    }

    async fn create_room(&self, request: &CreateRequest) -> Result<(), CoreError> {
        let Some(member) = self.platform.member(self.guild, request.user_id).await? else {
            debug!(user_id = %request.user_id, "Requester left the realm, create skipped");
            return Ok(());
        };
        if member.is_bot {
            return Ok(());
        }

        let Some(spawn) = self.platform.channel(request.spawn_id).await? else {
            return Err(CoreError::MalformedInput(format!(
                "spawn channel {} no longer exists",
                request.spawn_id
            )));
        };

        let prefs = self.prefs.prefs_for(request.user_id).await?;
        let name = prefs
            .as_ref()
            .and_then(|p| p.preferred_name.clone())
            .unwrap_or_else(|| self.rooms.room_name_for(&member.display_name));
        let position = (spawn.position - 1).max(0);

        // A spawn that hides or gates entry propagates its overwrites so
        // the room stays as private as its doorway; the owner overwrite
        // is merged last.
        let mut overwrites: Vec<PermissionOverwrite> = if spawn
            .denies_everyone(PermissionSet::CONNECT)
            || spawn.denies_everyone(PermissionSet::VIEW_CHANNEL)
        {
            spawn.overwrites.clone()
        } else {
            Vec::new()
        };
        overwrites.retain(|ow| ow.target != OverwriteTarget::User(request.user_id));
        overwrites.push(PermissionOverwrite::owner(request.user_id));

        let info = with_deadline(
            crate::platform::DEFAULT_DEADLINE,
            self.platform.create_voice_channel(CreateChannelSpec {
                guild_id: self.guild,
                name: name.clone(),
                position,
                user_limit: prefs.as_ref().and_then(|p| p.preferred_limit),
                overwrites,
            }),
        )
        .await?;

        if let Err(e) = with_deadline(
            crate::platform::DEFAULT_DEADLINE,
            self.platform.move_member(self.guild, request.user_id, info.id),
        )
        .await
        {
            // The user is gone; an empty room would linger unowned.
            warn!(user_id = %request.user_id, error = %e, "Move into new room failed, deleting it");
            let _ = self.platform.delete_channel(info.id).await;
            return Ok(());
        }

        let now = Utc::now();
        self.db
            .channels()
            .upsert_channel(&RoomRecord {
                id: info.id,
                guild_id: self.guild,
                name: name.clone(),
                position,
                is_user_room: true,
                spawn_id: Some(spawn.id),
                owner_id: None,
                owner_since: None,
                previous_owner_id: None,
                active: true,
                member_count: 1,
            })
            .await?;
        self.ownership.record_owner(info.id, request.user_id, now).await?;
        self.cache
            .set(
                &keys::channel_members(info.id),
                &vec![ChannelMember {
                    user_id: request.user_id,
                    joined_at: now,
                }],
                None,
            )
            .await?;

        // Let the platform settle before editing the fresh channel.
        tokio::time::sleep(SETTLE).await;

        self.prefs.apply_owner_setup(info.id, request.user_id).await?;

        if let Err(e) = with_deadline(
            crate::platform::DEFAULT_DEADLINE,
            self.platform.send_embed(info.id, welcome_card(&name)),
        )
        .await
        {
            warn!(channel_id = %info.id, error = %e, "Could not send welcome card");
        }

        crate::metrics::ROOMS_CREATED.inc();
        info!(
            channel_id = %info.id,
            owner_id = %request.user_id,
            name = %name,
            "User room created"
        );
        Ok(())
    }
}

fn welcome_card(room_name: &str) -> Embed {
    Embed {
        title: format!("Welcome to {room_name}"),
        description: "This room is yours. It disappears when everyone leaves.".to_string(),
        fields: vec![
            (
                "Room".to_string(),
                "/rename /limit /lock /unlock /hide /reveal".to_string(),
            ),
            (
                "Members".to_string(),
                "/mute /unmute /deafen /undeafen /kick /ban /unban /rename-user".to_string(),
            ),
            (
                "Ownership".to_string(),
                "/transfer /claim /coup".to_string(),
            ),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welcome_card_names_the_room() {
        let card = welcome_card("Case's Channel");
        assert!(card.title.contains("Case's Channel"));
        assert_eq!(card.fields.len(), 3);
    }
}
