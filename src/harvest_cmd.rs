//! One-shot harvest commands: `collect`, `process`, and `cycle`.
//!
//! Each command builds a [`Pipeline`] from config, makes sure the schema
//! exists, runs once, and prints a short summary to stdout.

use anyhow::Result;
use chrono::Utc;
use tokio::sync::watch;

use crate::config::Config;
use crate::harvest::{CollectReport, CycleReport, Pipeline};
use crate::migrate;
use crate::processor::ProcessReport;

async fn open_pipeline(config: &Config) -> Result<Pipeline> {
    let pipeline = Pipeline::from_config(config).await?;
    migrate::apply_schema(pipeline.store().pool()).await?;
    Ok(pipeline)
}

pub async fn run_collect(config: &Config) -> Result<()> {
    let pipeline = open_pipeline(config).await?;
    let report = pipeline.collect().await?;

    println!("collect {}", config.collector.root.display());
    print_collect(&report);
    println!("ok");

    pipeline.store().pool().close().await;
    Ok(())
}

pub async fn run_process(config: &Config) -> Result<()> {
    let pipeline = open_pipeline(config).await?;

    let report = match pipeline.process_pending_imports().await {
        Ok(report) => report,
        Err(aborted) => {
            println!("process (aborted)");
            print_process(&aborted.report);
            return Err(aborted.into());
        }
    };

    println!("process");
    print_process(&report);
    println!("ok");

    pipeline.store().pool().close().await;
    Ok(())
}

/// One harvest cycle. `force` skips the debounce check.
pub async fn run_cycle(config: &Config, force: bool) -> Result<()> {
    let pipeline = open_pipeline(config).await?;

    let report = if force {
        let (_tx, rx) = watch::channel(false);
        pipeline.run_forced_cycle(rx).await?
    } else {
        pipeline.run_harvest_cycle(Utc::now()).await?
    };

    match &report {
        CycleReport::Skipped { next_eligible } => {
            println!("cycle skipped");
            println!(
                "  recent import found; next eligible at {}",
                next_eligible.format("%Y-%m-%d %H:%M UTC")
            );
            println!("  use --force to collect anyway");
        }
        CycleReport::Ran {
            collected,
            processed,
        } => {
            println!("cycle");
            print_collect(collected);
            print_process(processed);
            println!("ok");
        }
    }

    pipeline.store().pool().close().await;
    Ok(())
}

fn print_collect(report: &CollectReport) {
    println!("  artifacts found: {}", report.found);
    println!("  new imports: {}", report.created);
    println!("  duplicates skipped: {}", report.duplicates);
    if report.skipped > 0 {
        println!("  skipped: {}", report.skipped);
    }
}

fn print_process(report: &ProcessReport) {
    println!("  imports attempted: {}", report.attempted);
    println!("  completed: {}", report.completed);
    println!("  will retry: {}", report.retried);
    println!("  failed permanently: {}", report.exhausted);
    println!("  deliveries written: {}", report.deliveries);
    if report.interrupted {
        println!("  interrupted by shutdown");
    }
}
