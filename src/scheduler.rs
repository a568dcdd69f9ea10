//! Recurring harvest scheduler with single-flight cycles.
//!
//! One background loop ticks every `interval`. Each tick either starts a
//! cycle on its own task or, if the previous cycle is still running, is
//! dropped. Ticks are never queued. The "cycle running" flag is owned by
//! [`HarvestScheduler`] and released by a guard when the cycle task ends,
//! even if it panics or is aborted.
//!
//! On shutdown the loop stops ticking, tells the in-flight cycle to stop
//! after its current import, and waits at most `shutdown_grace` for it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::PipelineError;
use crate::harvest::{CycleReport, Pipeline};

/// Work performed by one scheduled cycle.
#[async_trait]
pub trait HarvestJob: Send + Sync + 'static {
    async fn run_cycle(
        &self,
        now: DateTime<Utc>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<CycleReport, PipelineError>;
}

#[async_trait]
impl HarvestJob for Pipeline {
    async fn run_cycle(
        &self,
        now: DateTime<Utc>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<CycleReport, PipelineError> {
        self.run_harvest_cycle_until(now, shutdown).await
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Started,
    /// A cycle was already running; this tick was dropped.
    Coalesced,
}

/// Clears the running flag when the cycle task ends.
struct FlightGuard(Arc<AtomicBool>);

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct HarvestScheduler {
    job: Arc<dyn HarvestJob>,
    interval: Duration,
    shutdown_grace: Duration,
    running: Arc<AtomicBool>,
    in_flight: Mutex<Option<JoinHandle<()>>>,
    cycle_shutdown: watch::Sender<bool>,
}

impl HarvestScheduler {
    pub fn new(job: Arc<dyn HarvestJob>, interval: Duration, shutdown_grace: Duration) -> Self {
        let (cycle_shutdown, _) = watch::channel(false);
        Self {
            job,
            interval,
            shutdown_grace,
            running: Arc::new(AtomicBool::new(false)),
            in_flight: Mutex::new(None),
            cycle_shutdown,
        }
    }

    /// True while a cycle task is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start a cycle now unless one is already in flight.
    pub fn tick(&self) -> TickOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::info!("previous harvest cycle still running; tick dropped");
            return TickOutcome::Coalesced;
        }

        let guard = FlightGuard(self.running.clone());
        let job = self.job.clone();
        let shutdown = self.cycle_shutdown.subscribe();

        let handle = tokio::spawn(async move {
            let _guard = guard;
            let now = Utc::now();
            match job.run_cycle(now, shutdown).await {
                Ok(CycleReport::Skipped { next_eligible }) => {
                    tracing::debug!(%next_eligible, "harvest cycle skipped");
                }
                Ok(CycleReport::Ran {
                    collected,
                    processed,
                }) => {
                    tracing::info!(
                        new_imports = collected.created,
                        completed = processed.completed,
                        retried = processed.retried,
                        exhausted = processed.exhausted,
                        "harvest cycle finished"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "harvest cycle failed");
                }
            }
        });

        if let Ok(mut slot) = self.in_flight.lock() {
            *slot = Some(handle);
        }
        TickOutcome::Started
    }

    /// Tick every `interval` until `shutdown` becomes true, then drain.
    ///
    /// The first tick fires immediately.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), PipelineError> {
        tracing::info!(interval_secs = self.interval.as_secs(), "starting harvest scheduler");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("shutting down harvest scheduler");
        self.drain().await
    }

    /// Ask the in-flight cycle to stop and wait for it within the grace period.
    ///
    /// A drained scheduler stays stopped: cycles started by later ticks see
    /// the shutdown flag already set and stop before their first import.
    pub async fn drain(&self) -> Result<(), PipelineError> {
        self.cycle_shutdown.send_replace(true);

        let handle = match self.in_flight.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let Some(mut handle) = handle else {
            return Ok(());
        };

        match tokio::time::timeout(self.shutdown_grace, &mut handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(join_err)) => {
                tracing::error!(error = %join_err, "harvest cycle task ended abnormally");
                Ok(())
            }
            Err(_) => {
                handle.abort();
                tracing::error!(
                    grace_secs = self.shutdown_grace.as_secs(),
                    "harvest cycle did not finish within shutdown grace period"
                );
                Err(PipelineError::ShutdownTimeout(self.shutdown_grace))
            }
        }
    }
}
