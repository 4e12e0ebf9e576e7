//! Daemon assembly and lifecycle.
//!
//! [`App::start`] runs the startup sequence (store, cache hygiene,
//! duplicate cleanup, one reconcile pass) and then brings up the workers
//! and timers. The platform adapter feeds gateway events into
//! [`App::enqueue`]; [`App::shutdown`] drains and closes out.

use crate::cache::{Cache, CacheHandle};
use crate::commands::CommandService;
use crate::config::Config;
use crate::db::Database;
use crate::dispatch::{Dispatcher, EventHandler, UserLocks};
use crate::error::CoreError;
use crate::handlers::{ChannelUpdateHandler, VoiceStateHandler};
use crate::platform::{EventFamily, GatewayEvent, GuildId, Platform};
use crate::reconcile::Reconciler;
use crate::rooms::{CoupManager, OwnershipManager, PreferenceApplicator, RoomCreator};
use crate::security::RateLimiter;
use crate::tracker::SessionTracker;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct App {
    guild: GuildId,
    db: Database,
    cache: CacheHandle,
    dispatcher: Arc<Dispatcher>,
    commands: Arc<CommandService>,
    reconciler: Arc<Reconciler>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    /// Bring the control plane up. Errors here are fatal; after this
    /// returns, nothing is.
    pub async fn start(
        config: Config,
        platform: Arc<dyn Platform>,
        cache_backend: Arc<dyn Cache>,
    ) -> Result<App, CoreError> {
        let guild = GuildId(config.realm.guild_id);

        let db = Database::new(&config.database.path).await?;
        let cache = CacheHandle::new(cache_backend);

        // Cache hygiene before anything reads it.
        cache.purge_malformed().await?;
        cache.force_delete(&config.cache.force_delete_keys).await?;

        let duplicates = db
            .sessions()
            .cleanup_duplicate_active(guild, Utc::now())
            .await?;
        if duplicates > 0 {
            info!(closed = duplicates, "Duplicate open sessions closed at startup");
        }

        let tracker = Arc::new(SessionTracker::new(db.clone(), config.realm.clone()));
        let prefs = Arc::new(PreferenceApplicator::new(
            guild,
            config.rooms.clone(),
            db.clone(),
            cache.clone(),
            platform.clone(),
        ));
        let ownership = Arc::new(OwnershipManager::new(
            guild,
            db.clone(),
            cache.clone(),
            platform.clone(),
            prefs.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            guild,
            config.realm.clone(),
            db.clone(),
            cache.clone(),
            platform.clone(),
            ownership.clone(),
            tracker.clone(),
        ));

        // One pass before the event stream opens, so handlers start from
        // a repaired store.
        if let Err(e) = reconciler.run_once().await {
            warn!(error = %e, "Startup reconcile pass failed");
        }

        let (shutdown_tx, _) = broadcast::channel(4);
        let mut tasks = Vec::new();

        let creator = RoomCreator::new(
            guild,
            config.rooms.clone(),
            db.clone(),
            cache.clone(),
            platform.clone(),
            prefs.clone(),
            ownership.clone(),
        );
        let (create_queue, create_task) = creator.start(shutdown_tx.subscribe());
        tasks.push(create_task);

        let locks = Arc::new(UserLocks::new());
        let voice = Arc::new(VoiceStateHandler::new(
            guild,
            config.realm.clone(),
            config.rooms.max_voice_errors_before_resync,
            db.clone(),
            cache.clone(),
            platform.clone(),
            tracker.clone(),
            ownership.clone(),
            prefs.clone(),
            create_queue,
            locks,
        ));
        let channel_update = Arc::new(ChannelUpdateHandler::new(
            guild,
            config.realm.clone(),
            config.rooms.clone(),
            db.clone(),
            cache.clone(),
            platform.clone(),
        ));

        let mut handlers: HashMap<EventFamily, Arc<dyn EventHandler>> = HashMap::new();
        handlers.insert(EventFamily::Voice, voice);
        handlers.insert(EventFamily::Channel, channel_update);
        let dispatcher = Arc::new(Dispatcher::start(handlers));

        // Reconcile timer.
        {
            let reconciler = reconciler.clone();
            let period = Duration::from_secs(config.reconcile.period_s);
            let mut shutdown_rx = shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                // The first tick fires immediately; startup already ran a pass.
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = reconciler.run_once().await {
                                warn!(error = %e, "Reconcile pass failed");
                            }
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            }));
        }

        let coups = Arc::new(CoupManager::new(
            guild,
            Duration::from_secs(config.rooms.coup_window_s),
            db.clone(),
            cache.clone(),
            platform.clone(),
            ownership.clone(),
        ));
        let rate = RateLimiter::new(cache.clone(), config.rate_limit.clone());
        let commands = Arc::new(CommandService::new(
            guild,
            config.realm.clone(),
            db.clone(),
            cache.clone(),
            platform.clone(),
            ownership,
            coups,
            rate,
        ));

        info!(guild_id = %guild, "Control plane started");
        Ok(App {
            guild,
            db,
            cache,
            dispatcher,
            commands,
            reconciler,
            shutdown_tx,
            tasks,
        })
    }

    /// Hand a gateway event to the dispatcher. Returns immediately.
    pub fn enqueue(&self, event: GatewayEvent) {
        self.dispatcher.enqueue(event);
    }

    /// The command surface for the slash layer.
    pub fn commands(&self) -> Arc<CommandService> {
        self.commands.clone()
    }

    /// The reconciler, for manual ticks.
    pub fn reconciler(&self) -> Arc<Reconciler> {
        self.reconciler.clone()
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn cache(&self) -> &CacheHandle {
        &self.cache
    }

    /// Stop timers, drain the dispatcher, close every open session.
    pub async fn shutdown(self) {
        info!("Shutting down");
        let _ = self.shutdown_tx.send(());
        self.dispatcher.shutdown().await;
        for task in self.tasks {
            let _ = task.await;
        }

        match self
            .db
            .sessions()
            .close_all_active(self.guild, Utc::now())
            .await
        {
            Ok(closed) if closed > 0 => info!(closed = closed, "Open sessions closed"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Could not close open sessions"),
        }
        info!("Control plane stopped");
    }
}
