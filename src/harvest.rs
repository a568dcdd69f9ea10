//! Harvest cycle: collect artifacts, register new ones, process pending.
//!
//! [`Pipeline`] is the invocation surface used by the scheduler and the
//! CLI. A cycle first applies the debounce policy: if an import completed
//! less than `grace_period` ago, no new data is expected and the cycle is
//! skipped without touching the source feed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use crate::collect::{Collector, DirectoryCollector};
use crate::config::Config;
use crate::db;
use crate::error::{PipelineError, ProcessAborted};
use crate::extract::{self, Extractor};
use crate::fingerprint;
use crate::processor::{ImportProcessor, ProcessReport};
use crate::store::ImportStore;

/// Result of registering collected artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectReport {
    /// Artifacts returned by the collector.
    pub found: usize,
    /// New imports created.
    pub created: usize,
    /// Artifacts whose content was already known.
    pub duplicates: usize,
    /// Artifacts that could not be read for fingerprinting.
    pub skipped: usize,
}

/// Result of one harvest cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CycleReport {
    /// Debounced: nothing collected or processed.
    Skipped { next_eligible: DateTime<Utc> },
    Ran {
        collected: CollectReport,
        processed: ProcessReport,
    },
}

impl CycleReport {
    pub fn new_imports(&self) -> usize {
        match self {
            CycleReport::Skipped { .. } => 0,
            CycleReport::Ran { collected, .. } => collected.created,
        }
    }
}

/// Whether collection may run at `now`, given the last completion time.
///
/// Returns the earliest eligible time when it may not.
pub fn next_eligible_time(
    latest_completed_at: Option<DateTime<Utc>>,
    grace_period: chrono::Duration,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let next = latest_completed_at?
        .checked_add_signed(grace_period)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    if now < next {
        Some(next)
    } else {
        None
    }
}

pub struct Pipeline {
    store: ImportStore,
    collector: Arc<dyn Collector>,
    processor: ImportProcessor,
    grace_period: chrono::Duration,
}

impl Pipeline {
    pub fn new(
        store: ImportStore,
        collector: Arc<dyn Collector>,
        extractor: Arc<dyn Extractor>,
        max_retries: u32,
        grace_period: chrono::Duration,
    ) -> Self {
        let processor = ImportProcessor::new(store.clone(), extractor, max_retries);
        Self {
            store,
            collector,
            processor,
            grace_period,
        }
    }

    /// Build a pipeline from configuration: database, directory collector,
    /// and the configured extraction provider.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        crate::config::validate(config).map_err(|e| PipelineError::Config(format!("{:#}", e)))?;
        let pool = db::connect(config).await?;
        let collector = Arc::new(DirectoryCollector::new(config.collector.clone()));
        let extractor = extract::create_extractor(&config.extraction)?;
        Ok(Self::new(
            ImportStore::new(pool),
            collector,
            extractor,
            config.pipeline.max_retries,
            config.scheduler.grace_period(),
        ))
    }

    pub fn store(&self) -> &ImportStore {
        &self.store
    }

    /// Run the collector and create an import for every unseen artifact.
    ///
    /// Ignores the debounce policy. An unreadable artifact is skipped; a
    /// storage error ends the collection and is returned.
    pub async fn collect(&self) -> Result<CollectReport, PipelineError> {
        let paths = self
            .collector
            .download_artifacts()
            .await
            .map_err(PipelineError::Collection)?;

        let mut report = CollectReport {
            found: paths.len(),
            ..Default::default()
        };
        tracing::info!(collector = self.collector.name(), found = paths.len(), "artifacts collected");

        for path in &paths {
            let hash = match fingerprint::fingerprint_file(path).await {
                Ok(hash) => hash,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable artifact");
                    report.skipped += 1;
                    continue;
                }
            };

            let (created, id) = self.store.create_if_absent(path, hash).await?;
            if created {
                tracing::info!(import_id = id, path = %path.display(), "created import");
                report.created += 1;
            } else {
                tracing::debug!(
                    import_id = id,
                    path = %path.display(),
                    hash = %format!("{:016x}", hash),
                    "already imported; skipping"
                );
                report.duplicates += 1;
            }
        }

        Ok(report)
    }

    /// Process every eligible pending import once.
    pub async fn process_pending_imports(&self) -> Result<ProcessReport, ProcessAborted> {
        self.processor.process_pending().await
    }

    /// One full cycle at `now`: debounce, collect, process.
    pub async fn run_harvest_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport, PipelineError> {
        let (_tx, rx) = watch::channel(false);
        self.run_harvest_cycle_until(now, rx).await
    }

    /// [`run_harvest_cycle`](Self::run_harvest_cycle) with a shutdown signal
    /// checked between imports.
    pub async fn run_harvest_cycle_until(
        &self,
        now: DateTime<Utc>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<CycleReport, PipelineError> {
        let latest = self.store.latest_completed().await?;
        let latest_at = latest.and_then(|i| i.completed_at);

        if let Some(next_eligible) = next_eligible_time(latest_at, self.grace_period, now) {
            tracing::info!(%next_eligible, "recent import found; skipping collection");
            return Ok(CycleReport::Skipped { next_eligible });
        }

        let collected = self.collect().await?;
        let processed = self.processor.process_pending_until(shutdown).await?;

        Ok(CycleReport::Ran {
            collected,
            processed,
        })
    }

    /// Run the cycle without the debounce check.
    pub async fn run_forced_cycle(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<CycleReport, PipelineError> {
        let collected = self.collect().await?;
        let processed = self.processor.process_pending_until(shutdown).await?;
        Ok(CycleReport::Ran {
            collected,
            processed,
        })
    }
}
