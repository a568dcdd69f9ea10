//! # Schedule Harvester
//!
//! Collects published schedule images, extracts the delivery table from each
//! one with a vision model, and stores the rows in SQLite.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────────┐   ┌───────────┐   ┌──────────┐
//! │ Collector │──▶│ Fingerprint │──▶│  Imports  │──▶│Processor │
//! │ (images)  │   │  (dedup)    │   │ (pending) │   │ extract  │
//! └───────────┘   └─────────────┘   └───────────┘   └────┬─────┘
//!       ▲                                                │
//!       │ hourly, debounced                              ▼
//! ┌───────────┐                                    ┌───────────┐
//! │ Scheduler │                                    │Deliveries │──▶ CLI / HTTP
//! └───────────┘                                    └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! harvester init                 # create database
//! harvester cycle --force        # collect and process once
//! harvester deliveries --since 2025-03-01
//! harvester run                  # scheduler + read API until Ctrl-C
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Import and delivery types |
//! | [`fingerprint`] | Content hashing for deduplication |
//! | [`store`] | Import lifecycle and delivery queries |
//! | [`collect`] | Artifact collection |
//! | [`extract`] | Vision extraction clients |
//! | [`importer`] | CSV parsing and atomic import commit |
//! | [`processor`] | Pending import processing |
//! | [`harvest`] | Debounced harvest cycle |
//! | [`scheduler`] | Recurring single-flight scheduling |
//! | [`daemon`] | Scheduler + HTTP server with signal handling |
//! | [`server`] | Read-only HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema setup |

pub mod collect;
pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod harvest;
pub mod harvest_cmd;
pub mod importer;
pub mod list_cmd;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod processor;
pub mod scheduler;
pub mod server;
pub mod stats;
pub mod store;
