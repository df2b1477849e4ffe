//! Refresh cycle: download, unzip, decode, validate, publish.
//!
//! Cycles are serialized by a single lock. A scheduled trigger that finds
//! a cycle already running is dropped. Every stage failure aborts the
//! cycle and leaves the served snapshot untouched; scratch files are
//! removed either way.

use parking_lot::Mutex;
use std::fmt;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::NamedTempFile;

use crate::binary::decode_file;
use crate::config::{DataSyncConfig, DEFAULT_PROBE_IP};
use crate::database::GeoDatabase;
use crate::remote::{unzip_single, Fetcher};
use crate::snapshot::Snapshot;
use crate::{Error, Result};

/// Download attempts per cycle.
pub const DOWNLOAD_ATTEMPTS: usize = 2;

/// `strftime` pattern for snapshot versions (UTC day).
pub const VERSION_FORMAT: &str = "%Y-%m-%d";

/// Stage a cycle is in; used for log context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Downloading,
    Decompressing,
    Decoding,
    Validating,
    Publishing,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleState::Idle => "idle",
            CycleState::Downloading => "downloading",
            CycleState::Decompressing => "decompressing",
            CycleState::Decoding => "decoding",
            CycleState::Validating => "validating",
            CycleState::Publishing => "publishing",
        };
        f.write_str(name)
    }
}

/// Result of a triggered refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new snapshot is being served.
    Published { version: String },
    /// Another cycle was running; this trigger was dropped.
    Skipped,
}

/// Drives refresh cycles against one [`GeoDatabase`].
pub struct Refresher {
    db: Arc<GeoDatabase>,
    fetcher: Box<dyn Fetcher>,
    temp_dir: Option<PathBuf>,
    probe_ip: String,
    cycle: Mutex<()>,
    state: Mutex<CycleState>,
}

impl Refresher {
    /// Create a refresher publishing into `db`.
    pub fn new(db: Arc<GeoDatabase>, fetcher: Box<dyn Fetcher>) -> Self {
        Self {
            db,
            fetcher,
            temp_dir: None,
            probe_ip: DEFAULT_PROBE_IP.to_string(),
            cycle: Mutex::new(()),
            state: Mutex::new(CycleState::Idle),
        }
    }

    /// Create a refresher with scratch directory and probe from config.
    pub fn from_config(
        db: Arc<GeoDatabase>,
        fetcher: Box<dyn Fetcher>,
        config: &DataSyncConfig,
    ) -> Self {
        let mut refresher = Self::new(db, fetcher).with_probe_ip(&config.probe_ip);
        if let Some(dir) = &config.temp_dir {
            refresher = refresher.with_temp_dir(dir);
        }
        refresher
    }

    /// Put scratch files in `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.temp_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Address looked up to validate a freshly decoded snapshot.
    pub fn with_probe_ip(mut self, ip: &str) -> Self {
        self.probe_ip = ip.to_string();
        self
    }

    /// The database this refresher publishes into.
    pub fn database(&self) -> &Arc<GeoDatabase> {
        &self.db
    }

    /// Current stage of the running cycle, `Idle` between cycles.
    pub fn state(&self) -> CycleState {
        *self.state.lock()
    }

    /// Run one cycle unless another is already running.
    pub fn refresh(&self) -> Result<RefreshOutcome> {
        let Some(_guard) = self.cycle.try_lock() else {
            log::warn!(
                "ip geo refresh already running ({}), trigger dropped",
                self.state()
            );
            return Ok(RefreshOutcome::Skipped);
        };
        self.run_cycle()
            .map(|version| RefreshOutcome::Published { version })
    }

    /// Run one cycle, waiting for a running one to finish first.
    pub fn refresh_blocking(&self) -> Result<String> {
        let _guard = self.cycle.lock();
        self.run_cycle()
    }

    /// Panics anywhere in the stages are reported as [`Error::Internal`].
    fn run_cycle(&self) -> Result<String> {
        let started = Instant::now();
        log::info!("Start syncing ip geo data from {}", self.fetcher.location());

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.stages()))
            .unwrap_or_else(|payload| Err(Error::from_panic(payload)));
        let failed_in = self.state();
        self.set_state(CycleState::Idle);

        match &result {
            Ok(version) => log::info!(
                "Sync ip geo data done, version: {}, took {:?}",
                version,
                started.elapsed()
            ),
            Err(e) => log::error!("Sync ip geo data failed while {}: {}", failed_in, e),
        }
        result
    }

    fn stages(&self) -> Result<String> {
        let mut zipped = self.scratch(".zip")?;
        let result = self.download(zipped.as_file_mut()).and_then(|_| {
            log::info!("Downloaded ip geo data to {}", zipped.path().display());
            self.set_state(CycleState::Decompressing);
            let mut extracted = self.scratch(".dat")?;
            let result = unzip_single(zipped.path(), extracted.as_file_mut()).and_then(|n| {
                log::info!(
                    "Decompressed ip geo data to {} ({} bytes)",
                    extracted.path().display(),
                    n
                );
                self.install(extracted.path())
            });
            remove_scratch(extracted);
            result
        });
        remove_scratch(zipped);
        result
    }

    fn download(&self, file: &mut File) -> Result<u64> {
        self.set_state(CycleState::Downloading);
        let mut last_err = None;
        for attempt in 1..=DOWNLOAD_ATTEMPTS {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            match self.fetcher.fetch(file) {
                Ok(n) => return Ok(n),
                Err(e) => {
                    log::warn!(
                        "Download attempt {}/{} from {} failed: {}",
                        attempt,
                        DOWNLOAD_ATTEMPTS,
                        self.fetcher.location(),
                        e
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Remote("no download attempted".to_string())))
    }

    fn install(&self, path: &Path) -> Result<String> {
        let version = chrono::Utc::now().format(VERSION_FORMAT).to_string();
        let buffers = self.db.take_standby();

        self.set_state(CycleState::Decoding);
        let snapshot = decode_file(path, buffers, version)?;
        log::info!("Decoded ip geo data, records: {}", snapshot.record_count());

        self.set_state(CycleState::Validating);
        validate(&snapshot, &self.probe_ip)?;
        log::info!("Validated ip geo data with probe {}", self.probe_ip);

        self.set_state(CycleState::Publishing);
        let version = snapshot.version().to_string();
        self.db.publish(snapshot);
        Ok(version)
    }

    fn scratch(&self, suffix: &str) -> Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("ipgeo-").suffix(suffix);
        let file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(file)
    }

    fn set_state(&self, state: CycleState) {
        *self.state.lock() = state;
    }
}

/// Smoke-test a candidate snapshot with one full lookup.
pub fn validate(snapshot: &Snapshot, probe_ip: &str) -> Result<()> {
    snapshot
        .lookup(probe_ip)
        .map(|_| ())
        .map_err(|e| Error::Format(format!("probe lookup for {} failed: {}", probe_ip, e)))
}

fn remove_scratch(file: NamedTempFile) {
    let path = file.path().to_path_buf();
    if let Err(e) = file.close() {
        log::error!("Failed to remove {}: {}", path.display(), e);
    }
}
