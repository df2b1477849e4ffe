//! Refresh triggers and the background scheduler thread.

use chrono::Utc;
use cron::Schedule;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::DataSyncConfig;
use crate::{Error, Result};

/// Smallest interval accepted in test mode.
pub const MIN_TEST_INTERVAL_SECS: u64 = 5;

/// When refreshes fire.
#[derive(Clone)]
pub enum Trigger {
    /// Cron schedule evaluated in UTC.
    Cron { schedule: Schedule, expr: String },
    /// Fixed interval (test mode).
    Interval(Duration),
}

impl Trigger {
    /// Build the trigger described by `config`.
    pub fn from_config(config: &DataSyncConfig) -> Result<Self> {
        if config.for_test {
            if config.refresh_interval_secs < MIN_TEST_INTERVAL_SECS {
                return Err(Error::Config(format!(
                    "refresh interval must be at least {} seconds, got {}",
                    MIN_TEST_INTERVAL_SECS, config.refresh_interval_secs
                )));
            }
            return Ok(Trigger::Interval(Duration::from_secs(
                config.refresh_interval_secs,
            )));
        }
        Self::cron(&config.sync_cron)
    }

    /// Parse a cron expression. Five-field (minute-first) expressions get
    /// a leading seconds field of `0`.
    pub fn cron(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        let normalized = if expr.split_whitespace().count() == 5 {
            format!("0 {}", expr)
        } else {
            expr.to_string()
        };
        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| Error::Config(format!("invalid sync_cron {:?}: {}", expr, e)))?;
        Ok(Trigger::Cron {
            schedule,
            expr: normalized,
        })
    }

    /// Time until the next firing, `None` when the schedule has no
    /// upcoming occurrence.
    pub fn next_delay(&self) -> Option<Duration> {
        match self {
            Trigger::Interval(d) => Some(*d),
            Trigger::Cron { schedule, .. } => {
                let next = schedule.upcoming(Utc).next()?;
                Some((next - Utc::now()).to_std().unwrap_or(Duration::ZERO))
            }
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Cron { expr, .. } => write!(f, "cron({} UTC)", expr),
            Trigger::Interval(d) => write!(f, "every {:?}", d),
        }
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Default)]
struct Signal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Background thread running a task on every trigger firing.
pub struct Scheduler {
    signal: Arc<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn the scheduler thread.
    pub fn start<F>(trigger: Trigger, task: F) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let signal = Arc::new(Signal::default());
        let thread_signal = Arc::clone(&signal);
        log::info!("Starting ip geo refresh scheduler, {}", trigger);

        let handle = thread::Builder::new()
            .name("ipgeo-refresh".to_string())
            .spawn(move || run(trigger, &thread_signal, task))?;

        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Whether the thread is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the thread and wait for it. A firing in progress completes
    /// first.
    pub fn stop(&mut self) -> Result<()> {
        *self.signal.stopped.lock() = true;
        self.signal.wake.notify_all();
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::Internal("refresh scheduler thread panicked".to_string())),
            None => Ok(()),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("Failed to stop refresh scheduler: {}", e);
        }
    }
}

fn run<F: Fn()>(trigger: Trigger, signal: &Signal, task: F) {
    loop {
        let Some(delay) = trigger.next_delay() else {
            log::warn!("Refresh schedule {} has no upcoming time, stopping", trigger);
            return;
        };

        let deadline = Instant::now() + delay;
        let mut stopped = signal.stopped.lock();
        while !*stopped {
            if signal.wake.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        if *stopped {
            return;
        }
        drop(stopped);

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(&task)) {
            log::error!(
                "Scheduled refresh panicked: {}",
                Error::from_panic(payload)
            );
        }
    }
}
