//! # flat-stac
//!
//! Flattens a partitioned pgstac catalog into query-friendly relational
//! results for hydrologic model metadata.
//!
//! Every collection of the source catalog stores its items in its own
//! physical partition (`_items_<key>`). flat-stac copies all of them into one
//! flat item table, derives typed domain results from the embedded JSON
//! documents (gage summaries, model-gage links, levee/dam elements, storm
//! summaries), joins links with gage metadata, and publishes the whole set
//! atomically as one version.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │ CatalogSource│──▶│ consolidate │──▶│ extract+join │──▶│ FlatStore│
//! │ pgstac / dir │   │ flat items  │   │ derived rows │   │  SQLite  │
//! └──────────────┘   └─────────────┘   └──────────────┘   └────┬─────┘
//!                                                              ▼
//!                                                   status / stats / show
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! flatstac init                     # create database
//! flatstac sources                  # check the registry against partitions
//! flatstac refresh                  # consolidate, derive, publish
//! flatstac status --check-source    # is the published version stale?
//! flatstac show gages-by-model-id --model-id blw-elkhart
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`catalog`] | Catalog source trait ([`catalog_pgstac`], [`catalog_dir`], [`catalog_memory`]) |
//! | [`consolidate`] | Partition consolidation |
//! | [`extract`] | Domain extractors |
//! | [`join`] | Gage join aggregator |
//! | [`refresh`] | Refresh orchestration, locking, staleness |
//! | [`store`] | Published version storage |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod catalog;
pub mod catalog_dir;
pub mod catalog_memory;
pub mod catalog_pgstac;
pub mod config;
pub mod consolidate;
pub mod db;
pub mod error;
pub mod extract;
pub mod join;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod refresh;
pub mod show;
pub mod sources;
pub mod stats;
pub mod status;
pub mod store;

#[cfg(test)]
mod test_utils;
