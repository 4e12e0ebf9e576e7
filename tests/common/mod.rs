//! Integration test common infrastructure.
//!
//! Builds the control plane against the fake platform, an in-memory
//! cache and a `:memory:` store, and provides event-injection helpers
//! that mimic the gateway.

#![allow(dead_code)]

pub mod platform;

pub use platform::FakePlatform;

use atriumd::App;
use atriumd::cache::MemoryCache;
use atriumd::config::{
    CacheConfig, Config, DatabaseConfig, RateLimitConfig, RealmConfig, ReconcileConfig,
    RoomsConfig, ServerConfig,
};
use atriumd::platform::{ChannelId, GatewayEvent, GuildId, UserId, VoiceTransition};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

pub const GUILD: u64 = 9000;
pub const SPAWN: u64 = 100;
pub const EXCLUDED: u64 = 300;

pub struct TestHarness {
    pub app: App,
    pub platform: Arc<FakePlatform>,
    pub guild: GuildId,
}

fn test_config() -> Config {
    Config {
        server: ServerConfig {
            log_format: Default::default(),
            metrics_port: Some(0),
        },
        realm: RealmConfig {
            guild_id: GUILD,
            spawn_channel_ids: vec![SPAWN],
            excluded_channel_ids: vec![EXCLUDED],
            afk_channel_ids: vec![],
        },
        rooms: RoomsConfig {
            room_creation_delay_ms: 1,
            ..RoomsConfig::default()
        },
        reconcile: ReconcileConfig { period_s: 3600 },
        database: DatabaseConfig {
            path: ":memory:".to_string(),
        },
        cache: CacheConfig::default(),
        rate_limit: RateLimitConfig::default(),
    }
}

impl TestHarness {
    /// Spawn a harness with the spawn channel already in place.
    pub async fn spawn() -> Self {
        let guild = GuildId(GUILD);
        let platform = Arc::new(FakePlatform::new(guild));
        platform.add_channel(SPAWN, "Join to Create", 5);

        let app = App::start(test_config(), platform.clone(), Arc::new(MemoryCache::new()))
            .await
            .expect("app should start");

        Self {
            app,
            platform,
            guild,
        }
    }

    pub fn user(&self, id: u64, name: &str) {
        self.platform.add_member(id, name, false, false);
    }

    /// A user joins a channel: occupancy changes and the gateway event
    /// is injected.
    pub fn join_at(&self, user: u64, channel: u64, at: DateTime<Utc>) {
        let from = self.platform.occupant_channel(user);
        self.platform.occupy(user, channel);
        self.app.enqueue(GatewayEvent::VoiceState(VoiceTransition {
            user_id: UserId(user),
            guild_id: self.guild,
            from,
            to: Some(ChannelId(channel)),
            at,
        }));
    }

    pub fn join(&self, user: u64, channel: u64) {
        self.join_at(user, channel, Utc::now());
    }

    pub fn leave_at(&self, user: u64, channel: u64, at: DateTime<Utc>) {
        self.platform.vacate(user);
        self.app.enqueue(GatewayEvent::VoiceState(VoiceTransition {
            user_id: UserId(user),
            guild_id: self.guild,
            from: Some(ChannelId(channel)),
            to: None,
            at,
        }));
    }

    pub fn leave(&self, user: u64, channel: u64) {
        self.leave_at(user, channel, Utc::now());
    }

    pub fn move_user_at(&self, user: u64, from: u64, to: u64, at: DateTime<Utc>) {
        self.platform.occupy(user, to);
        self.app.enqueue(GatewayEvent::VoiceState(VoiceTransition {
            user_id: UserId(user),
            guild_id: self.guild,
            from: Some(ChannelId(from)),
            to: Some(ChannelId(to)),
            at,
        }));
    }

    /// Feed daemon-caused platform transitions (moves, disconnects)
    /// back into the app, as the real gateway would.
    pub fn pump(&self) {
        for transition in self.platform.drain_events() {
            self.app.enqueue(GatewayEvent::VoiceState(transition));
        }
    }

    /// Let in-flight events finish without a specific condition.
    pub async fn settle(&self) {
        for _ in 0..8 {
            self.pump();
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Drive events through the spawn channel until the user's room
    /// exists with ownership recorded, and return its id.
    pub async fn create_room(&self, owner: u64, display_name: &str) -> ChannelId {
        self.join(owner, SPAWN);
        let expected = format!("{display_name}'s Channel");
        for _ in 0..400 {
            self.pump();
            if let Some(room) = self.platform.find_channel_by_name(&expected) {
                let owned = self
                    .app
                    .db()
                    .channels()
                    .get_channel(room.id)
                    .await
                    .unwrap()
                    .is_some_and(|r| r.owner_id == Some(UserId(owner)));
                let session_open = self
                    .app
                    .db()
                    .sessions()
                    .open_session_for_user(UserId(owner), self.guild)
                    .await
                    .unwrap()
                    .is_some_and(|s| s.channel_id == room.id);
                if owned && session_open {
                    return room.id;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("room for {display_name} was never created");
    }
}

/// Poll `$cond` (an expression, awaits allowed) while pumping platform
/// events, panicking after a generous deadline.
macro_rules! wait_for {
    ($h:expr, $what:expr, $cond:expr) => {{
        let mut satisfied = false;
        for _ in 0..400 {
            $h.pump();
            if $cond {
                satisfied = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        if !satisfied {
            panic!("timed out waiting for: {}", $what);
        }
    }};
}
pub(crate) use wait_for;
