//! # regwatch
//!
//! A watcher for regulatory-publication portals.
//!
//! regwatch discovers documents published by banking authorities, fetches
//! them, detects new or changed content by checksum, expands zip archives
//! into their member files, and keeps an append-only version lineage per
//! URL in SQLite. Every new or changed document then runs through a stage
//! pipeline: text extraction, translation, keyword scanning and
//! notification.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Discovery  │──▶│  Ingestor    │──▶│  Repository  │
//! │  HTML links │   │ fetch+expand │   │ SQLite lineage│
//! └─────────────┘   └──────┬───────┘   └──────────────┘
//!                          │ changed documents
//!                          ▼
//!                 ┌──────────────────┐
//!                 │  Stage pipeline  │
//!                 │ extract→translate│
//!                 │ →keywords→notify │
//!                 └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! regwatch init                 # create database, seed keywords
//! regwatch sync BCL             # ingest only
//! regwatch run BCL              # ingest + stage pipeline
//! regwatch history https://www.bcl.lu/.../manual.pdf
//! regwatch schedule             # periodic runs until Ctrl-C
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`fingerprint`] | Content checksums |
//! | [`formats`] | Extension to format dispatch |
//! | [`archive`] | Zip archive expansion |
//! | [`store`] | Document repository and record tables |
//! | [`discovery`] | Listing-page link discovery |
//! | [`fetch`] | HTTP byte fetcher |
//! | [`ingest`] | Ingestion orchestrator |
//! | [`pipeline`] | Per-document stage runner |
//! | [`extract`] | Text extraction |
//! | [`translate`] | Machine translation |
//! | [`keywords`] | Keyword scanning |
//! | [`notify`] | Notifications |
//! | [`run`] | Ingest + pipeline wiring |
//! | [`scheduler`] | Periodic runs |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod archive;
pub mod config;
pub mod db;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod fingerprint;
pub mod formats;
pub mod history;
pub mod ingest;
pub mod keywords;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod run;
pub mod scheduler;
pub mod snippet;
pub mod stats;
pub mod store;
pub mod translate;
