//! Import processor: drains eligible pending imports, one at a time.
//!
//! For each import, oldest first:
//!
//! ```text
//! read bytes ─▶ extract ─▶ parse CSV ─▶ commit deliveries + completed
//!      │            │           │
//!      └────────────┴───────────┴──▶ mark_failed (retry next cycle, or failed)
//! ```
//!
//! Per-import failures never abort the run. Storage failures do, and come
//! back as [`ProcessAborted`] with the counts reached so far. Imports are
//! processed sequentially, so the extraction vendor sees at most one request
//! at a time.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::{PipelineError, ProcessAborted};
use crate::extract::{Artifact, Extractor};
use crate::importer;
use crate::models::{Import, ImportState};
use crate::store::ImportStore;

/// Outcome counts of one processor run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    /// Imports picked up in this run.
    pub attempted: usize,
    /// Imports that reached `completed`.
    pub completed: usize,
    /// Imports that failed this attempt but stay pending.
    pub retried: usize,
    /// Imports that failed their last allowed attempt.
    pub exhausted: usize,
    /// Deliveries written by the completed imports.
    pub deliveries: u64,
    /// The run stopped early because shutdown was requested.
    pub interrupted: bool,
}

enum Attempt {
    Completed(u64),
    Failed(anyhow::Error),
    Skipped,
}

pub struct ImportProcessor {
    store: ImportStore,
    extractor: Arc<dyn Extractor>,
    max_retries: u32,
}

impl ImportProcessor {
    pub fn new(store: ImportStore, extractor: Arc<dyn Extractor>, max_retries: u32) -> Self {
        Self {
            store,
            extractor,
            max_retries,
        }
    }

    /// Process every eligible pending import once.
    pub async fn process_pending(&self) -> Result<ProcessReport, ProcessAborted> {
        let (_tx, rx) = watch::channel(false);
        self.process_pending_until(rx).await
    }

    /// Like [`process_pending`](Self::process_pending), but stops between
    /// imports once `shutdown` flips to true. The import in flight when the
    /// signal arrives is finished first.
    pub async fn process_pending_until(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<ProcessReport, ProcessAborted> {
        let mut report = ProcessReport::default();

        let imports = match self.store.list_eligible_pending(self.max_retries).await {
            Ok(imports) => imports,
            Err(source) => return Err(ProcessAborted { report, source }),
        };

        if imports.is_empty() {
            tracing::debug!("no pending imports");
            return Ok(report);
        }
        tracing::info!(
            pending = imports.len(),
            extractor = self.extractor.name(),
            "processing pending imports"
        );

        for import in &imports {
            if *shutdown.borrow() {
                tracing::info!(
                    remaining = imports.len() - report.attempted,
                    "shutdown requested; stopping before next import"
                );
                report.interrupted = true;
                break;
            }

            report.attempted += 1;
            if let Err(source) = self.process_one(import, &mut report).await {
                tracing::error!(import_id = import.id, error = %source, "storage error; aborting run");
                return Err(ProcessAborted { report, source });
            }
        }

        tracing::info!(
            attempted = report.attempted,
            completed = report.completed,
            retried = report.retried,
            exhausted = report.exhausted,
            "processing finished"
        );
        Ok(report)
    }

    async fn process_one(
        &self,
        import: &Import,
        report: &mut ProcessReport,
    ) -> Result<(), PipelineError> {
        tracing::info!(
            import_id = import.id,
            path = %import.source_path.display(),
            attempt = import.retry_count + 1,
            "analyzing import"
        );

        match self.attempt(import).await? {
            Attempt::Completed(written) => {
                tracing::info!(import_id = import.id, deliveries = written, "import completed");
                report.completed += 1;
                report.deliveries += written;
            }
            Attempt::Skipped => {}
            Attempt::Failed(err) => {
                let state = self.store.mark_failed(import.id, self.max_retries).await?;
                match state {
                    ImportState::Failed => {
                        tracing::warn!(
                            import_id = import.id,
                            error = %format!("{:#}", err),
                            "import failed; retry limit reached"
                        );
                        report.exhausted += 1;
                    }
                    _ => {
                        tracing::warn!(
                            import_id = import.id,
                            error = %format!("{:#}", err),
                            "import failed; will retry next cycle"
                        );
                        report.retried += 1;
                    }
                }
            }
        }

        Ok(())
    }

    /// Run the extraction and import steps for one import.
    ///
    /// Only storage errors escape as `Err`; everything else is an
    /// [`Attempt::Failed`].
    async fn attempt(&self, import: &Import) -> Result<Attempt, PipelineError> {
        let artifact = match Artifact::load(&import.source_path).await {
            Ok(artifact) => artifact,
            Err(e) => return Ok(Attempt::Failed(e)),
        };

        let text = match self.extractor.extract(&artifact).await {
            Ok(text) => text,
            Err(e) => return Ok(Attempt::Failed(e.context("extraction failed"))),
        };
        tracing::debug!(import_id = import.id, text = %text, "extraction output");

        let records = match importer::parse_deliveries(&text) {
            Ok(records) => records,
            Err(e) => return Ok(Attempt::Failed(anyhow::Error::new(e).context("parse failed"))),
        };

        if importer::commit_import(self.store.pool(), import.id, &records).await? {
            Ok(Attempt::Completed(records.len() as u64))
        } else {
            Ok(Attempt::Skipped)
        }
    }
}
