//! Listing commands: `deliveries` and `imports`.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;

use crate::config::Config;
use crate::db;
use crate::importer::DATE_FORMAT;
use crate::models::ImportState;
use crate::store::{DeliveryQuery, ImportStore};

fn parse_date_arg(flag: &str, value: Option<String>) -> Result<Option<NaiveDate>> {
    value
        .map(|v| {
            NaiveDate::parse_from_str(&v, DATE_FORMAT)
                .with_context(|| format!("Invalid --{} date '{}'. Use YYYY-MM-DD.", flag, v))
        })
        .transpose()
}

pub async fn run_deliveries(
    config: &Config,
    since: Option<String>,
    until: Option<String>,
    location: Option<String>,
    limit: Option<i64>,
    json: bool,
) -> Result<()> {
    let query = DeliveryQuery {
        since: parse_date_arg("since", since)?,
        until: parse_date_arg("until", until)?,
        location,
        limit: limit.unwrap_or(DeliveryQuery::default().limit),
    };
    if query.limit <= 0 {
        bail!("--limit must be positive");
    }

    let pool = db::connect(config).await?;
    let store = ImportStore::new(pool.clone());
    let deliveries = store.list_deliveries(&query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&deliveries)?);
    } else if deliveries.is_empty() {
        println!("No deliveries.");
    } else {
        println!(
            "{:<12} {:<12} {:<18} {}",
            "DATE", "SCHEDULE", "TYPE", "LOCATION"
        );
        println!("{}", "-".repeat(72));
        for d in &deliveries {
            println!(
                "{:<12} {:<12} {:<18} {}",
                d.date.format(DATE_FORMAT).to_string(),
                d.schedule,
                d.location_type,
                d.location_name
            );
        }
        println!();
        println!("{} deliveries", deliveries.len());
    }

    pool.close().await;
    Ok(())
}

pub async fn run_imports(config: &Config, state: Option<String>, limit: i64) -> Result<()> {
    let state = state.map(|s| s.parse::<ImportState>()).transpose()?;
    if limit <= 0 {
        bail!("--limit must be positive");
    }

    let pool = db::connect(config).await?;
    let store = ImportStore::new(pool.clone());
    let imports = store.list_imports(state, limit).await?;

    if imports.is_empty() {
        println!("No imports.");
    } else {
        println!(
            "{:>5}  {:<10} {:>7}  {:<17} {}",
            "ID", "STATE", "RETRIES", "CREATED", "SOURCE"
        );
        println!("{}", "-".repeat(80));
        for i in &imports {
            println!(
                "{:>5}  {:<10} {:>7}  {:<17} {}",
                i.id,
                i.state.as_str(),
                i.retry_count,
                i.created_at.format("%Y-%m-%d %H:%M").to_string(),
                i.source_path.display()
            );
        }
    }

    pool.close().await;
    Ok(())
}
