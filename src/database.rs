//! Live database holder with atomic hot swap.
//!
//! Readers take one lock-free snapshot load per lookup and traverse an
//! immutable structure; the refresh path builds a complete [`Snapshot`]
//! off to the side and publishes it with a single pointer swap. A reader
//! therefore sees either the old or the new snapshot in full.

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::record::GeoInfo;
use crate::snapshot::{Buffers, Snapshot};
use crate::{Error, Result};

/// The currently served snapshot plus the displaced one kept for reuse.
pub struct GeoDatabase {
    /// Published snapshot; `None` only until the first publish.
    active: ArcSwapOption<Snapshot>,
    /// Previously active snapshot, recycled by the next decode when no
    /// reader still holds it.
    standby: Mutex<Option<Arc<Snapshot>>>,
    /// Number of successful publications.
    generation: AtomicU64,
}

impl Default for GeoDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl GeoDatabase {
    /// Create an empty database. Lookups fail with [`Error::NotReady`]
    /// until a snapshot is published.
    pub fn new() -> Self {
        Self {
            active: ArcSwapOption::empty(),
            standby: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Create a database already serving `snapshot`.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let db = Self::new();
        db.publish(snapshot);
        db
    }

    /// Resolve an address against the current snapshot.
    ///
    /// Any panic raised while reading the snapshot is reported as
    /// [`Error::Internal`] instead of unwinding into the caller.
    pub fn lookup(&self, ip: &str) -> Result<GeoInfo> {
        let guard = self.active.load();
        let snapshot = guard.as_deref().ok_or(Error::NotReady)?;

        match panic::catch_unwind(AssertUnwindSafe(|| snapshot.lookup(ip))) {
            Ok(result) => result.map(|record| GeoInfo::new(snapshot.version(), record)),
            Err(payload) => Err(Error::from_panic(payload)),
        }
    }

    /// Atomically replace the served snapshot.
    ///
    /// In-flight lookups finish against the snapshot they loaded; later
    /// lookups see the new one.
    pub fn publish(&self, snapshot: Snapshot) {
        let version = snapshot.version().to_string();
        let count = snapshot.record_count();
        let old = self.active.swap(Some(Arc::new(snapshot)));
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.standby.lock() = old;

        log::info!(
            "Published ip geo snapshot, version: {}, records: {}",
            version,
            count
        );
    }

    /// Buffers for the next decode: the displaced snapshot's allocations
    /// when no reader still holds it, fresh ones otherwise.
    pub fn take_standby(&self) -> Buffers {
        let standby = self.standby.lock().take();
        match standby.map(Arc::try_unwrap) {
            Some(Ok(snapshot)) => snapshot.into_buffers(),
            Some(Err(_)) => {
                log::debug!("Standby snapshot still in use, allocating fresh buffers");
                Buffers::new()
            }
            None => Buffers::new(),
        }
    }

    /// The served snapshot, if any.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.active.load_full()
    }

    /// Whether a snapshot has been published.
    pub fn is_loaded(&self) -> bool {
        self.active.load().is_some()
    }

    /// Version of the served snapshot.
    pub fn version(&self) -> Option<String> {
        self.active.load().as_deref().map(|s| s.version().to_string())
    }

    /// Number of successful publications.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}
