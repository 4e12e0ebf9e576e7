//! Event dispatcher.
//!
//! Gateway callbacks must return within milliseconds, so each event is
//! converted to a typed record and pushed onto an unbounded FIFO; one
//! worker per family consumes sequentially. Ordering holds within a
//! family, never across. The per-user lock table gives voice handling
//! its single-flight guarantee against concurrent resync work.

use crate::platform::{EventFamily, GatewayEvent, UserId};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A consumer of one event family.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process one event. Errors must be absorbed, never returned.
    async fn handle(&self, event: GatewayEvent);
}

/// Drops events after a debug line. Families whose payloads are audited
/// elsewhere (message, reaction, member) get this consumer.
pub struct DiscardHandler;

#[async_trait]
impl EventHandler for DiscardHandler {
    async fn handle(&self, event: GatewayEvent) {
        debug!(family = event.family().name(), "Event family not consumed here");
    }
}

/// Fine-grained lock table keyed by user id.
///
/// Holding a user's guard serialises their voice transitions: a JOIN
/// cannot interleave with its own LEAVE, and a force resync cannot run
/// under an in-flight transition.
#[derive(Default)]
pub struct UserLocks {
    locks: DashMap<UserId, Arc<tokio::sync::Mutex<()>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, user: UserId) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(user)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

/// Non-blocking queue from gateway callbacks to family workers.
pub struct Dispatcher {
    senders: Mutex<Option<HashMap<EventFamily, mpsc::UnboundedSender<GatewayEvent>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Start one worker per family with the given handlers. Families
    /// without an entry get a [`DiscardHandler`].
    pub fn start(mut handlers: HashMap<EventFamily, Arc<dyn EventHandler>>) -> Self {
        let mut senders = HashMap::new();
        let mut workers = Vec::new();

        for family in EventFamily::ALL {
            let handler = handlers
                .remove(&family)
                .unwrap_or_else(|| Arc::new(DiscardHandler));
            let (tx, mut rx) = mpsc::unbounded_channel::<GatewayEvent>();
            senders.insert(family, tx);

            workers.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    handler.handle(event).await;
                }
                debug!(family = family.name(), "Event worker drained");
            }));
        }

        Self {
            senders: Mutex::new(Some(senders)),
            workers: Mutex::new(workers),
        }
    }

    /// Enqueue an event and return immediately.
    ///
    /// Events arriving after shutdown began are dropped.
    pub fn enqueue(&self, event: GatewayEvent) {
        let senders = self.senders.lock();
        match senders.as_ref().and_then(|map| map.get(&event.family())) {
            Some(tx) => {
                let _ = tx.send(event);
            }
            None => debug!(
                family = event.family().name(),
                "Event dropped, dispatcher closed"
            ),
        }
    }

    /// Stop intake, drain every queue, then join the workers.
    pub async fn shutdown(&self) {
        // Dropping the senders lets each worker drain its backlog and exit.
        let senders = self.senders.lock().take();
        drop(senders);

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.await;
        }
        info!("Event dispatcher drained");
    }
}
