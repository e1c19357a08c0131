//! Run/stop state and probe interval shared between the scheduler and the
//! settings API.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use crate::db::{DbError, Store};

pub const MIN_INTERVAL_SECS: u64 = 10;
pub const MAX_INTERVAL_SECS: u64 = 86_400;

const INTERVAL_KEY: &str = "probe_interval";
const RUN_STATE_KEY: &str = "task_status";

/// Whether new probe cycles may fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Stopped,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunState {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "running" => Ok(RunState::Running),
            "stopped" => Ok(RunState::Stopped),
            other => Err(ControlError::InvalidRunState(other.to_string())),
        }
    }
}

/// Settings-boundary errors. Nothing invalid reaches the scheduler.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error(
        "probe interval must be between {min} and {max} seconds, got {0}",
        min = MIN_INTERVAL_SECS,
        max = MAX_INTERVAL_SECS
    )]
    IntervalOutOfRange(u64),
    #[error("run state must be \"running\" or \"stopped\", got {0:?}")]
    InvalidRunState(String),
    #[error("failed to persist setting: {0}")]
    Storage(#[from] DbError),
}

pub fn validate_interval(secs: u64) -> Result<u64, ControlError> {
    if (MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&secs) {
        Ok(secs)
    } else {
        Err(ControlError::IntervalOutOfRange(secs))
    }
}

/// The single place the probe interval and run state are read and changed.
///
/// Every change is validated, persisted, and only then made visible to the
/// scheduler.
pub struct ScheduleControl {
    store: Arc<Store>,
    interval_secs: AtomicU64,
    run_state: watch::Sender<RunState>,
    write_lock: Mutex<()>,
}

impl ScheduleControl {
    /// Restore the persisted settings, falling back to `default_interval_secs`
    /// and a stopped scheduler.
    pub fn load(store: Arc<Store>, default_interval_secs: u64) -> Result<Self, DbError> {
        let fallback = default_interval_secs.clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS);

        let interval = match store.get_setting(INTERVAL_KEY)? {
            Some(raw) => match raw.parse::<u64>().ok().and_then(|v| validate_interval(v).ok()) {
                Some(secs) => secs,
                None => {
                    tracing::warn!("Persisted probe interval {:?} is invalid, using {}s", raw, fallback);
                    fallback
                }
            },
            None => fallback,
        };

        let run_state = match store.get_setting(RUN_STATE_KEY)? {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!("Persisted run state {:?} is invalid, scheduler stays stopped", raw);
                RunState::Stopped
            }),
            None => RunState::Stopped,
        };

        let (run_state, _) = watch::channel(run_state);

        Ok(Self {
            store,
            interval_secs: AtomicU64::new(interval),
            run_state,
            write_lock: Mutex::new(()),
        })
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs.load(Ordering::Acquire)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs())
    }

    /// Change the probe interval. Takes effect at the next scheduling decision.
    pub fn set_interval(&self, secs: u64) -> Result<(), ControlError> {
        let secs = validate_interval(secs)?;
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());

        self.store.set_setting(INTERVAL_KEY, &secs.to_string())?;
        self.interval_secs.store(secs, Ordering::Release);

        tracing::info!("Probe interval set to {}s", secs);
        Ok(())
    }

    pub fn run_state(&self) -> RunState {
        *self.run_state.borrow()
    }

    /// Switch between running and stopped. Returns whether the state changed;
    /// setting the current state again is a no-op.
    pub fn set_run_state(&self, state: RunState) -> Result<bool, ControlError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());

        self.store.set_setting(RUN_STATE_KEY, state.as_str())?;
        let changed = self.run_state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });

        if changed {
            tracing::info!("Scheduler {}", state);
        }
        Ok(changed)
    }

    #[cfg(test)]
    pub fn start(&self) -> Result<bool, ControlError> {
        self.set_run_state(RunState::Running)
    }

    #[cfg(test)]
    pub fn stop(&self) -> Result<bool, ControlError> {
        self.set_run_state(RunState::Stopped)
    }

    /// Watch run state transitions.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.run_state.subscribe()
    }
}
