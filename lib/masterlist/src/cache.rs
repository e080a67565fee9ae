//! Single-slot cache for the latest reconciliation snapshot.
//!
//! Readers get an `Arc` to a complete snapshot and never wait on a network
//! call. Writers replace the slot wholesale and then persist it through the
//! configured [`KeyValueStore`]; concurrent writers are serialized and the
//! last one wins.

use chrono::{DateTime, Duration, Utc};
use shared::reconcile::ReconciliationSnapshot;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::KeyValueStore;

/// Store key holding the serialized snapshot.
pub const SNAPSHOT_KEY: &str = "reconciliation_snapshot";

/// Default freshness window (1 hour).
pub const DEFAULT_TTL_SECS: i64 = 3600;

/// A snapshot is stale when absent or strictly older than `ttl`.
pub fn is_stale(snapshot: Option<&ReconciliationSnapshot>, now: DateTime<Utc>, ttl: Duration) -> bool {
    match snapshot {
        Some(s) => now - s.captured_at > ttl,
        None => true,
    }
}

pub struct ReconciliationCache {
    store: Arc<dyn KeyValueStore>,
    slot: RwLock<Option<Arc<ReconciliationSnapshot>>>,
    hydrated: AtomicBool,
    write_lock: Mutex<()>,
    ttl: Duration,
}

impl ReconciliationCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_ttl(store, Duration::seconds(DEFAULT_TTL_SECS))
    }

    pub fn with_ttl(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self {
            store,
            slot: RwLock::new(None),
            hydrated: AtomicBool::new(false),
            write_lock: Mutex::new(()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn current(&self) -> Option<Arc<ReconciliationSnapshot>> {
        self.slot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn replace(&self, snapshot: Arc<ReconciliationSnapshot>) {
        *self
            .slot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(snapshot);
    }

    /// Latest snapshot, loading it from the store on first access.
    ///
    /// Store failures and undecodable payloads count as a miss.
    pub async fn get(&self) -> Option<Arc<ReconciliationSnapshot>> {
        if let Some(snapshot) = self.current() {
            return Some(snapshot);
        }
        if self.hydrated.load(Ordering::Acquire) {
            return None;
        }

        let loaded = match self.store.get(SNAPSHOT_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<ReconciliationSnapshot>(&raw) {
                Ok(snapshot) => Some(Arc::new(snapshot)),
                Err(e) => {
                    warn!("Ignoring unreadable cached snapshot: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Cache read failed, treating as miss: {}", e);
                None
            }
        };

        let mut slot = self
            .slot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // a put that raced with the load is newer than what we read
        if slot.is_none() {
            *slot = loaded;
        }
        self.hydrated.store(true, Ordering::Release);
        slot.clone()
    }

    /// Replaces the snapshot. The in-memory slot is swapped before the
    /// store write, so a persistence error leaves readers on the new value.
    pub async fn put(&self, snapshot: ReconciliationSnapshot) -> Result<()> {
        let snapshot = Arc::new(snapshot);
        let _guard = self.write_lock.lock().await;
        self.replace(snapshot.clone());
        self.hydrated.store(true, Ordering::Release);

        let raw = serde_json::to_string(snapshot.as_ref())?;
        self.store.put(SNAPSHOT_KEY, &raw).await?;
        debug!(
            "Cached snapshot with {} master / {} missing tracks",
            snapshot.master_tracks.len(),
            snapshot.missing_tracks.len()
        );
        Ok(())
    }

    pub async fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        is_stale(self.get().await.as_deref(), now, ttl)
    }

    pub async fn is_stale_default(&self, now: DateTime<Utc>) -> bool {
        self.is_stale(now, self.ttl).await
    }
}
