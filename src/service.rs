//! Service lifecycle: initial load, scheduled refresh, readiness.

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::config::DataSyncConfig;
use crate::database::GeoDatabase;
use crate::record::GeoInfo;
use crate::refresh::Refresher;
use crate::remote::{fetcher_for_url, Fetcher};
use crate::schedule::{Scheduler, Trigger};
use crate::Result;

/// Owns the served database and keeps it fresh.
///
/// ```no_run
/// use ipgeo::{DataSyncConfig, GeoService};
///
/// let service = GeoService::new(&DataSyncConfig::new("https://example.com/ipdata.zip"))?;
/// service.init()?;
/// let info = service.lookup("8.8.8.8")?;
/// println!("{} {}", info.continent_code, info.record.country);
/// service.shutdown();
/// # Ok::<(), ipgeo::Error>(())
/// ```
pub struct GeoService {
    refresher: Arc<Refresher>,
    trigger: Trigger,
    scheduler: Mutex<Option<Scheduler>>,
    ready: OnceCell<()>,
}

impl GeoService {
    /// Create a service downloading from `config.download_url`.
    ///
    /// Fails with a config error when the schedule is invalid.
    pub fn new(config: &DataSyncConfig) -> Result<Self> {
        Self::with_fetcher(config, fetcher_for_url(&config.download_url))
    }

    /// Create a service reading the database through `fetcher`.
    pub fn with_fetcher(config: &DataSyncConfig, fetcher: Box<dyn Fetcher>) -> Result<Self> {
        let trigger = Trigger::from_config(config)?;
        let db = Arc::new(GeoDatabase::new());
        Ok(Self {
            refresher: Arc::new(Refresher::from_config(db, fetcher, config)),
            trigger,
            scheduler: Mutex::new(None),
            ready: OnceCell::new(),
        })
    }

    /// Replace the refresh trigger. Takes effect on the next `init`.
    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    /// Load the first snapshot, start scheduled refreshes and mark the
    /// service ready.
    ///
    /// A failed first load is returned to the caller; the service must not
    /// serve without data. Calling `init` on a running service is a no-op.
    pub fn init(&self) -> Result<()> {
        let mut slot = self.scheduler.lock();
        if slot.is_some() {
            log::warn!("ip geo service already initialized");
            return Ok(());
        }

        let version = self.refresher.refresh_blocking()?;

        let refresher = Arc::clone(&self.refresher);
        let scheduler = Scheduler::start(self.trigger.clone(), move || {
            // Failures are logged by the cycle and leave the served data as is.
            let _ = refresher.refresh();
        })?;
        *slot = Some(scheduler);

        if self.ready.set(()).is_ok() {
            log::info!("ip geo service ready, version: {}", version);
        }
        Ok(())
    }

    /// Stop scheduled refreshes. Errors are logged only.
    pub fn shutdown(&self) {
        if let Some(mut scheduler) = self.scheduler.lock().take() {
            match scheduler.stop() {
                Ok(()) => log::info!("ip geo refresh scheduler stopped"),
                Err(e) => log::error!("Failed to stop ip geo refresh scheduler: {}", e),
            }
        }
    }

    /// Whether the first `init` has succeeded. Stays true afterwards
    /// regardless of later refresh failures.
    pub fn is_ready(&self) -> bool {
        self.ready.get().is_some()
    }

    /// Resolve a dotted-quad address.
    pub fn lookup(&self, ip: &str) -> Result<GeoInfo> {
        self.refresher.database().lookup(ip)
    }

    /// The served database.
    pub fn database(&self) -> &Arc<GeoDatabase> {
        self.refresher.database()
    }

    /// The refresh driver, for manual triggers.
    pub fn refresher(&self) -> &Arc<Refresher> {
        &self.refresher
    }
}

impl Drop for GeoService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
