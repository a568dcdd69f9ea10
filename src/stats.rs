//! Database statistics and health overview.
//!
//! A quick summary of what the harvester has done: imports per state,
//! delivery rows, and when the last import completed. Used by
//! `harvester stats` to confirm the scheduler and extraction are working.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::db;
use crate::store::{ImportStore, StateCounts};

/// Snapshot of the store.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub imports: StateCounts,
    pub deliveries: i64,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub last_completed_path: Option<String>,
}

pub async fn collect_stats(store: &ImportStore) -> Result<Stats> {
    let imports = store.count_by_state().await?;
    let deliveries = store.count_deliveries().await?;
    let latest = store.latest_completed().await?;

    Ok(Stats {
        imports,
        deliveries,
        last_completed_at: latest.as_ref().and_then(|i| i.completed_at),
        last_completed_path: latest.map(|i| i.source_path.display().to_string()),
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = ImportStore::new(pool.clone());
    let stats = collect_stats(&store).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Schedule Harvester: Database Stats");
    println!("==================================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Imports:     {}", stats.imports.total());
    println!("    pending:   {}", stats.imports.pending);
    println!("    completed: {}", stats.imports.completed);
    println!("    failed:    {}", stats.imports.failed);
    println!();
    println!("  Deliveries:  {}", stats.deliveries);

    let last = match stats.last_completed_at {
        Some(at) => format_ts_relative(at, Utc::now()),
        None => "never".to_string(),
    };
    println!("  Last import: {}", last);
    if let Some(path) = &stats.last_completed_path {
        println!("               {}", path);
    }
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a timestamp relative to `now` (e.g. "3 hours ago").
fn format_ts_relative(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - at).num_seconds();

    if delta < 0 {
        return at.format("%Y-%m-%d %H:%M").to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        at.format("%Y-%m-%d %H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn relative_times() {
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap();
        assert_eq!(format_ts_relative(now, now), "just now");
        assert_eq!(
            format_ts_relative(now - chrono::Duration::hours(1), now),
            "1 hour ago"
        );
        assert_eq!(
            format_ts_relative(now - chrono::Duration::days(3), now),
            "3 days ago"
        );
        assert_eq!(
            format_ts_relative(now - chrono::Duration::days(60), now),
            "2025-01-13 12:00"
        );
    }
}
