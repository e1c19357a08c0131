//! Scheduler module for running probe cycles and pruning old results.

mod control;
mod retention;

pub use control::*;
pub use retention::*;

use crate::config::{ServerConfig, MAX_CONCURRENT_PROBES};
use crate::db::{DbError, ProbeResult, Store, Target};
use crate::probe::{ProbeOutcome, Prober};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;

/// Base delay between attempts to write a result; grows linearly per retry.
const WRITE_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// What happens when a cycle is due while the previous one is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Start the new cycle anyway. Both share the probe concurrency limit.
    Overlap,
    /// Drop the firing and wait for the next one.
    Skip,
}

impl FromStr for OverlapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overlap" => Ok(OverlapPolicy::Overlap),
            "skip" => Ok(OverlapPolicy::Skip),
            other => Err(format!("unknown overlap policy: {}", other)),
        }
    }
}

/// Tally of one probe cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub fired_at: Option<DateTime<Utc>>,
    pub targets: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Targets the prober refused as malformed; nothing is recorded for them.
    pub invalid: usize,
    pub write_failures: usize,
    pub elapsed_ms: u64,
}

enum TargetOutcome {
    Recorded { success: bool },
    WriteFailed { success: bool },
    Invalid,
}

/// Drives probe cycles across all active targets.
pub struct Scheduler {
    store: Arc<Store>,
    prober: Arc<dyn Prober>,
    control: Arc<ScheduleControl>,
    probe_slots: Arc<Semaphore>,
    cycle_gate: Arc<Semaphore>,
    overlap_policy: OverlapPolicy,
    write_retries: u32,
    retention_manager: RetentionManager,
    stop: broadcast::Sender<()>,
    started: AtomicBool,
}

impl Scheduler {
    /// Create a new scheduler. Nothing runs until [`Scheduler::start`].
    pub fn new(
        store: Arc<Store>,
        prober: Arc<dyn Prober>,
        control: Arc<ScheduleControl>,
        cfg: &ServerConfig,
    ) -> Self {
        let retention_manager =
            RetentionManager::new(store.clone(), cfg.retention_days, cfg.prune_interval);
        let (stop, _) = broadcast::channel(1);

        Self {
            store,
            prober,
            control,
            probe_slots: Arc::new(Semaphore::new(cfg.max_concurrent_probes.clamp(1, MAX_CONCURRENT_PROBES))),
            cycle_gate: Arc::new(Semaphore::new(1)),
            overlap_policy: cfg.overlap_policy,
            write_retries: cfg.write_retries,
            retention_manager,
            stop,
            started: AtomicBool::new(false),
        }
    }

    pub fn control(&self) -> &Arc<ScheduleControl> {
        &self.control
    }

    /// Start the timer and the retention task.
    ///
    /// Fails if the target registry cannot be read, so an unusable store stops
    /// startup instead of producing empty cycles forever. Whether cycles
    /// actually fire is governed by the run state, not by this call.
    pub async fn start(self: &Arc<Self>) -> Result<(), DbError> {
        let targets = self.store.list_active_targets()?;

        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        tracing::info!(
            "Starting scheduler with {} active targets (state: {}, interval: {}s, policy: {:?})",
            targets.len(),
            self.control.run_state(),
            self.control.interval_secs(),
            self.overlap_policy
        );

        let this = Arc::clone(self);
        let stop_rx = self.stop.subscribe();
        tokio::spawn(async move { this.run_timer(stop_rx).await });

        self.retention_manager.start();

        Ok(())
    }

    /// Stop the timer and retention task. In-flight cycles finish on their own.
    pub async fn shutdown(&self) {
        let _ = self.stop.send(());
        self.retention_manager.stop().await;
    }

    async fn run_timer(self: Arc<Self>, mut stop_rx: broadcast::Receiver<()>) {
        let mut state_rx = self.control.subscribe();

        'timer: loop {
            let running = *state_rx.borrow_and_update() == RunState::Running;
            if !running {
                tokio::select! {
                    _ = stop_rx.recv() => break 'timer,
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break 'timer;
                        }
                        continue 'timer;
                    }
                }
            }

            self.fire_cycle();

            // Read fresh each time; a changed interval applies from here on.
            let sleep = tokio::time::sleep(self.control.interval());
            tokio::pin!(sleep);
            let mut stopped = false;

            // A stop followed by a start ends the wait early; nothing else does.
            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break 'timer,
                    _ = &mut sleep => break,
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break 'timer;
                        }
                        match *state_rx.borrow_and_update() {
                            RunState::Stopped => stopped = true,
                            RunState::Running if stopped => break,
                            RunState::Running => {}
                        }
                    }
                }
            }
        }

        tracing::info!("Scheduler: timer stopped");
    }

    fn fire_cycle(self: &Arc<Self>) {
        let gate = match self.overlap_policy {
            OverlapPolicy::Overlap => None,
            OverlapPolicy::Skip => match self.cycle_gate.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!("Skipping probe cycle: previous cycle still running");
                    return;
                }
            },
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _gate = gate;
            this.run_cycle().await;
        });
    }

    /// Probe every active target once and record each outcome as it settles.
    pub async fn run_cycle(&self) -> CycleReport {
        let targets = match self.store.list_active_targets() {
            Ok(t) => t,
            Err(e) => {
                tracing::error!("Scheduler: Failed to load active targets: {}", e);
                return CycleReport::default();
            }
        };

        let fired_at = Utc::now();
        let started = Instant::now();
        let mut report = CycleReport {
            fired_at: Some(fired_at),
            targets: targets.len(),
            ..Default::default()
        };

        let mut tasks = JoinSet::new();
        for target in targets {
            // Wait for a free slot before spawning, so queued targets cost nothing.
            let permit = match self.probe_slots.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };

            let prober = self.prober.clone();
            let store = self.store.clone();
            let retries = self.write_retries;

            tasks.spawn(async move {
                let _permit = permit;
                probe_and_record(prober.as_ref(), &store, &target, fired_at, retries).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(TargetOutcome::Recorded { success }) => report.count(success),
                Ok(TargetOutcome::WriteFailed { success }) => {
                    report.count(success);
                    report.write_failures += 1;
                }
                Ok(TargetOutcome::Invalid) => report.invalid += 1,
                Err(e) => tracing::error!("Scheduler: Probe task failed: {}", e),
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            "Probe cycle complete: {} targets, {} up, {} down, {} write failures in {}ms",
            report.targets,
            report.succeeded,
            report.failed,
            report.write_failures,
            report.elapsed_ms
        );

        report
    }
}

impl CycleReport {
    fn count(&mut self, success: bool) {
        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

async fn probe_and_record(
    prober: &dyn Prober,
    store: &Store,
    target: &Target,
    fired_at: DateTime<Utc>,
    retries: u32,
) -> TargetOutcome {
    let outcome = match prober.probe(&target.public_ip, target.port).await {
        Ok(o) => o,
        Err(e) => {
            tracing::error!("Scheduler: Skipping target {}: {}", target.id, e);
            return TargetOutcome::Invalid;
        }
    };

    let success = outcome.is_success();
    let result = match &outcome {
        ProbeOutcome::Connected(_) => ProbeResult::success(target, outcome.latency_ms(), fired_at),
        ProbeOutcome::Failed(reason) => {
            tracing::debug!(
                "Target {} ({}:{}) unreachable: {}",
                target.id,
                target.public_ip,
                target.port,
                reason
            );
            ProbeResult::failure(target, fired_at)
        }
    };

    if append_with_retry(store, &result, retries).await {
        TargetOutcome::Recorded { success }
    } else {
        TargetOutcome::WriteFailed { success }
    }
}

async fn append_with_retry(store: &Store, result: &ProbeResult, retries: u32) -> bool {
    let mut attempt = 0;
    loop {
        match store.append_result(result) {
            Ok(_) => return true,
            Err(e) if attempt < retries => {
                attempt += 1;
                tracing::warn!(
                    "Failed to write result for {}:{} (attempt {}): {}",
                    result.public_ip,
                    result.port,
                    attempt,
                    e
                );
                tokio::time::sleep(WRITE_RETRY_BACKOFF * attempt).await;
            }
            Err(e) => {
                tracing::error!(
                    "Dropping result for {}:{} after {} attempts: {}",
                    result.public_ip,
                    result.port,
                    attempt + 1,
                    e
                );
                return false;
            }
        }
    }
}
