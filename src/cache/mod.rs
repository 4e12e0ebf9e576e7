//! Cache gateway for hot lookups.
//!
//! Backends implement the raw [`Cache`] trait; the core talks to
//! [`CacheHandle`], which serialises records inside a versioned envelope
//! and deletes anything malformed on read: a corrupt value is a miss,
//! never a payload. The cache is last-writer-wins; the reconciler is the
//! authority that corrects drift.

pub mod keys;
mod memory;
mod types;

pub use memory::MemoryCache;
pub use types::{CallState, ChannelMember, CoupSession, CoupVote, OwnerEntry, RateWindow};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::platform::{GuildId, UserId};

/// Record schema version; a mismatch is treated as malformed.
const SCHEMA_VERSION: u8 = 1;

/// Cache errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

impl CacheError {
    /// Whether a retry may succeed. Backend faults always qualify: the
    /// cache holds no authoritative state.
    pub fn is_transient(&self) -> bool {
        true
    }
}

/// Raw key-value backend with optional TTL.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_raw(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Keys currently present under a prefix.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError>;
}

#[derive(Serialize, serde::Deserialize)]
struct Envelope<T> {
    v: u8,
    data: T,
}

/// Whether a raw value is one of the malformed shapes earlier
/// deployments left behind: empty strings, literal nulls, or records
/// coerced to a bare JSON string.
fn is_malformed_sentinel(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty()
        || trimmed == "null"
        || trimmed == "\"null\""
        || trimmed.starts_with('"')
}

/// Typed cache façade used by the core.
#[derive(Clone)]
pub struct CacheHandle {
    backend: Arc<dyn Cache>,
}

impl CacheHandle {
    pub fn new(backend: Arc<dyn Cache>) -> Self {
        Self { backend }
    }

    /// Fetch and decode a record. Malformed entries are deleted and
    /// reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let Some(raw) = self.backend.get_raw(key).await? else {
            return Ok(None);
        };

        if is_malformed_sentinel(&raw) {
            warn!(key = %key, "Malformed cache value, deleting");
            self.backend.delete(key).await?;
            return Ok(None);
        }

        match serde_json::from_str::<Envelope<T>>(&raw) {
            Ok(envelope) if envelope.v == SCHEMA_VERSION => Ok(Some(envelope.data)),
            Ok(envelope) => {
                debug!(key = %key, version = envelope.v, "Stale cache schema, deleting");
                self.backend.delete(key).await?;
                Ok(None)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Undecodable cache value, deleting");
                self.backend.delete(key).await?;
                Ok(None)
            }
        }
    }

    /// Encode and store a record.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let raw = serde_json::to_string(&Envelope {
            v: SCHEMA_VERSION,
            data: value,
        })
        .map_err(|e| CacheError::Backend(e.to_string()))?;

        self.backend.set_raw(key, raw, ttl).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.backend.delete(key).await
    }

    /// Drop the cached preference copy after a preference write.
    pub async fn invalidate_user_prefs(
        &self,
        user: UserId,
        guild: GuildId,
    ) -> Result<(), CacheError> {
        self.delete(&keys::user_prefs(user, guild)).await
    }

    /// Startup sweep: delete every entry in the core namespaces that does
    /// not decode as a current-version envelope. Returns the purge count.
    pub async fn purge_malformed(&self) -> Result<usize, CacheError> {
        let mut purged = 0;

        for namespace in keys::NAMESPACES {
            for key in self.backend.scan_prefix(namespace).await? {
                let Some(raw) = self.backend.get_raw(&key).await? else {
                    continue;
                };

                let bad = is_malformed_sentinel(&raw)
                    || match serde_json::from_str::<Envelope<serde_json::Value>>(&raw) {
                        Ok(envelope) => envelope.v != SCHEMA_VERSION,
                        Err(_) => true,
                    };

                if bad {
                    debug!(key = %key, "Purging malformed cache entry");
                    self.backend.delete(&key).await?;
                    purged += 1;
                }
            }
        }

        if purged > 0 {
            info!(purged = purged, "Malformed cache entries purged");
        }
        Ok(purged)
    }

    /// Delete an explicit list of known-bad keys.
    pub async fn force_delete(&self, keys: &[String]) -> Result<(), CacheError> {
        for key in keys {
            self.backend.delete(key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::ChannelId;

    fn handle() -> (CacheHandle, Arc<MemoryCache>) {
        let backend = Arc::new(MemoryCache::new());
        (CacheHandle::new(backend.clone()), backend)
    }

    #[tokio::test]
    async fn round_trip() {
        let (cache, _) = handle();
        let state = CallState::fresh(ChannelId(5), Some(UserId(1)), chrono::Utc::now());

        cache
            .set(&keys::call_state(ChannelId(5)), &state, None)
            .await
            .unwrap();
        let loaded: Option<CallState> = cache.get(&keys::call_state(ChannelId(5))).await.unwrap();
        assert_eq!(loaded, Some(state));
    }

    #[tokio::test]
    async fn malformed_sentinels_are_misses_and_deleted() {
        let (cache, backend) = handle();

        for raw in ["", "null", "\"null\"", "\"[object Object]\""] {
            backend
                .set_raw("call_state:9", raw.to_string(), None)
                .await
                .unwrap();
            let loaded: Option<CallState> = cache.get("call_state:9").await.unwrap();
            assert!(loaded.is_none(), "raw {raw:?} should be a miss");
            assert_eq!(backend.get_raw("call_state:9").await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn version_mismatch_is_a_miss() {
        let (cache, backend) = handle();
        backend
            .set_raw(
                "channel_owner:5",
                r#"{"v":0,"data":{"user_id":1,"owned_since":"2026-01-01T00:00:00Z"}}"#.to_string(),
                None,
            )
            .await
            .unwrap();

        let loaded: Option<OwnerEntry> = cache.get("channel_owner:5").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn purge_sweeps_all_namespaces() {
        let (cache, backend) = handle();

        backend
            .set_raw("coup:1", "garbage".to_string(), None)
            .await
            .unwrap();
        backend
            .set_raw("rate_limit:1:mute", "".to_string(), None)
            .await
            .unwrap();
        cache
            .set(
                &keys::channel_owner(ChannelId(5)),
                &OwnerEntry {
                    user_id: UserId(1),
                    owned_since: chrono::Utc::now(),
                },
                None,
            )
            .await
            .unwrap();

        let purged = cache.purge_malformed().await.unwrap();
        assert_eq!(purged, 2);

        // The healthy record survives.
        let owner: Option<OwnerEntry> = cache.get(&keys::channel_owner(ChannelId(5))).await.unwrap();
        assert!(owner.is_some());
    }
}
