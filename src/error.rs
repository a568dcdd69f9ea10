//! Error taxonomy for the import pipeline.
//!
//! Only failures that abort a whole cycle live here. Per-import problems
//! (vendor errors, unreadable artifacts, malformed CSV) are absorbed by the
//! processor and turned into a retry-count increment instead.

use std::path::PathBuf;
use std::time::Duration;

use crate::processor::ProcessReport;

/// Errors that abort a harvest cycle or a processor run.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// The durable store failed (connection loss, unexpected constraint, ...).
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// The collection collaborator could not produce an artifact list.
    #[error("collection failed: {0:#}")]
    Collection(anyhow::Error),

    /// Local I/O failure outside of a single import's processing.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// In-flight work did not finish within the shutdown grace period.
    #[error("shutdown timed out after {}s", .0.as_secs())]
    ShutdownTimeout(Duration),

    #[error("configuration error: {0}")]
    Config(String),
}

/// A processor run stopped early because storage failed.
///
/// Imports completed before the failure stay committed; `report` counts them.
#[derive(thiserror::Error, Debug)]
#[error("processing aborted after {} completed imports: {source}", .report.completed)]
pub struct ProcessAborted {
    pub report: ProcessReport,
    #[source]
    pub source: PipelineError,
}

impl From<ProcessAborted> for PipelineError {
    fn from(aborted: ProcessAborted) -> Self {
        aborted.source
    }
}
