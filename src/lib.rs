//! # billcast
//!
//! Finds bills in a mailbox, exports them, and forecasts monthly spending
//! per category from a transaction ledger.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌─────────────┐
//! │ MessageSource│──▶│ decode +     │──▶│ crawl /     │──▶ CLI, HTTP
//! │ Gmail/fixture│   │ extract      │   │ export CSV  │
//! └──────────────┘   └─────────────┘   └─────────────┘
//!
//! ┌──────────┐  sync   ┌───────────┐  train/predict  ┌──────────┐
//! │  ledger  │───────▶│ warehouse │───────────────▶│ forecast │──▶ CLI, HTTP
//! └──────────┘        └───────────┘                 └──────────┘
//! ```
//!
//! Message decoding, field extraction, and sorting live in the
//! `billcast-core` crate; this crate adds storage, sources, and the
//! command-line and HTTP surfaces.
//!
//! ## Quick Start
//!
//! ```bash
//! billcast init
//! billcast bills --pages 2 --sort amount
//! billcast export
//! billcast ledger add --entity e1 --type EXPENSE --amount 500 --category Food --date 2022-01-15
//! billcast forecast --entity e1
//! billcast serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | SQLite pools |
//! | [`migrate`] | Schema creation |
//! | [`error`] | Typed errors for source and warehouse failures |
//! | [`connector_gmail`] | Gmail REST message source |
//! | [`connector_fixture`] | JSON fixture message source |
//! | [`sources`] | Source selection |
//! | [`crawl`] | Interactive paged crawl with sorting |
//! | [`export`] | Bulk CSV export |
//! | [`progress`] | Export progress reporting |
//! | [`ledger`] | Transaction store |
//! | [`warehouse`] | Analytical store and model lifecycle |
//! | [`regression`] | Linear model |
//! | [`forecast`] | Sync-and-forecast engine |
//! | [`server`] | HTTP API |

pub mod config;
pub mod connector_fixture;
pub mod connector_gmail;
pub mod crawl;
pub mod db;
pub mod error;
pub mod export;
pub mod forecast;
pub mod ledger;
pub mod migrate;
pub mod progress;
pub mod regression;
pub mod server;
pub mod sources;
pub mod warehouse;
