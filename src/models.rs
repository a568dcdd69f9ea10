//! Core data models used throughout the harvester.
//!
//! These types represent the imports tracked by the pipeline and the
//! delivery records extracted from them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Processing state of an import.
///
/// `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportState {
    Pending,
    Completed,
    Failed,
}

impl ImportState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportState::Pending => "pending",
            ImportState::Completed => "completed",
            ImportState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ImportState::Pending)
    }
}

impl fmt::Display for ImportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ImportState::Pending),
            "completed" => Ok(ImportState::Completed),
            "failed" => Ok(ImportState::Failed),
            other => anyhow::bail!(
                "invalid import state '{}': expected pending, completed, or failed",
                other
            ),
        }
    }
}

/// One artifact discovered by collection, as stored in SQLite.
#[derive(Debug, Clone, Serialize)]
pub struct Import {
    pub id: i64,
    pub source_path: PathBuf,
    /// Fingerprint of the artifact bytes. Serialized as hex for readability.
    #[serde(serialize_with = "serialize_hash")]
    pub content_hash: u64,
    pub state: ImportState,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

fn serialize_hash<S: serde::Serializer>(hash: &u64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format!("{:016x}", hash))
}

/// One normalized row of an import's extracted table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryRecord {
    pub date: NaiveDate,
    pub schedule: String,
    pub location_type: String,
    pub location_name: String,
}

impl DeliveryRecord {
    /// Build a record, case-folding the schedule and location type.
    pub fn normalized(
        date: NaiveDate,
        schedule: &str,
        location_type: &str,
        location_name: &str,
    ) -> Self {
        Self {
            date,
            schedule: schedule.to_lowercase(),
            location_type: location_type.to_lowercase(),
            location_name: location_name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_parses_case_insensitively() {
        assert_eq!("Pending".parse::<ImportState>().unwrap(), ImportState::Pending);
        assert_eq!("FAILED".parse::<ImportState>().unwrap(), ImportState::Failed);
        assert!("done".parse::<ImportState>().is_err());
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!ImportState::Pending.is_terminal());
        assert!(ImportState::Completed.is_terminal());
        assert!(ImportState::Failed.is_terminal());
    }

    #[test]
    fn normalized_lowercases_schedule_and_type_only() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let rec = DeliveryRecord::normalized(date, "Matutino", "COLONIA", "Centro");
        assert_eq!(rec.schedule, "matutino");
        assert_eq!(rec.location_type, "colonia");
        assert_eq!(rec.location_name, "Centro");
    }
}
