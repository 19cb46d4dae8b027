//! Catalog source abstraction.
//!
//! A [`CatalogSource`] exposes the upstream collection registry and the
//! per-collection physical partitions holding catalog items. Partitions
//! are never addressed by a name built on the fly and used blindly: the
//! consolidator asks [`resolve_partition`](CatalogSource::resolve_partition)
//! for every registry entry first, and only reads once all of them resolved.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              CatalogSource               │
//! │  ┌──────────┐ ┌───────────┐ ┌──────────┐ │
//! │  │  pgstac  │ │ directory │ │  memory  │ │
//! │  │ (sqlx)   │ │  (ndjson) │ │ (tests)  │ │
//! │  └──────────┘ └───────────┘ └──────────┘ │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!        consolidate() → extract → publish
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::catalog_dir::DirectoryCatalog;
use crate::catalog_pgstac::PgstacCatalog;
use crate::config::Config;
use crate::error::FlattenResult;
use crate::models::{CatalogItem, CollectionEntry, Partition};

#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Label used in logs and `flatstac sources` output.
    fn name(&self) -> &str;

    /// The live collection registry, one entry per distinct key.
    async fn list_collections(&self) -> FlattenResult<Vec<CollectionEntry>>;

    /// Map a registry entry to its physical partition.
    ///
    /// Returns `Ok(None)` when the partition does not exist.
    async fn resolve_partition(&self, entry: &CollectionEntry) -> FlattenResult<Option<Partition>>;

    /// Every physical partition name present in the source, registered or not.
    async fn list_partitions(&self) -> FlattenResult<Vec<String>>;

    /// Read all items stored in a resolved partition.
    async fn read_partition(&self, partition: &Partition) -> FlattenResult<Vec<CatalogItem>>;
}

/// Build the catalog source configured under `[source]`.
pub async fn open_source(config: &Config) -> Result<Box<dyn CatalogSource>> {
    if let Some(pg) = &config.source.pgstac {
        let url = pg
            .resolved_url()
            .ok_or_else(|| anyhow::anyhow!("pgstac source has no connection URL"))?;
        let catalog = PgstacCatalog::connect(&url, &pg.schema, pg.max_connections)
            .await
            .with_context(|| format!("Failed to connect to pgstac schema '{}'", pg.schema))?;
        return Ok(Box::new(catalog));
    }
    if let Some(dir) = &config.source.directory {
        return Ok(Box::new(DirectoryCatalog::new(&dir.root)?));
    }
    anyhow::bail!("No catalog source configured")
}
