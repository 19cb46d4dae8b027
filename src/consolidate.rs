//! Partition consolidation.
//!
//! Copies every item of every registered collection into one flat item
//! vector. All registry entries are resolved to partitions before the first
//! read: a registry entry without a partition aborts the whole run with
//! [`FlattenError::SchemaDrift`] so a partial union is never produced.

use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::catalog::CatalogSource;
use crate::error::{FlattenError, FlattenResult};
use crate::models::{CatalogItem, CollectionEntry, Partition};
use crate::progress::{RefreshProgressEvent, RefreshProgressReporter};

/// The union of all source partitions at one point in time.
#[derive(Debug, Clone)]
pub struct Consolidation {
    /// Items ordered by collection key, then id.
    pub items: Vec<CatalogItem>,
    pub collections: Vec<CollectionEntry>,
    /// Item count per collection id.
    pub per_collection: HashMap<String, u64>,
    /// SHA-256 over every copied item, see [`fingerprint`].
    pub fingerprint: String,
}

/// Resolve every registry entry, failing on the first one without a partition.
pub async fn resolve_all(
    source: &dyn CatalogSource,
    collections: &[CollectionEntry],
) -> FlattenResult<Vec<Partition>> {
    let mut partitions = Vec::with_capacity(collections.len());
    for entry in collections {
        match source.resolve_partition(entry).await? {
            Some(partition) => partitions.push(partition),
            None => {
                return Err(FlattenError::SchemaDrift {
                    collection: entry.id.clone(),
                    key: entry.key,
                    partition: crate::models::partition_name(entry.key),
                })
            }
        }
    }
    Ok(partitions)
}

/// Physical partitions that no registry entry points to.
pub async fn orphan_partitions(
    source: &dyn CatalogSource,
    partitions: &[Partition],
) -> FlattenResult<Vec<String>> {
    let known: HashSet<&str> = partitions.iter().map(|p| p.name.as_str()).collect();
    Ok(source
        .list_partitions()
        .await?
        .into_iter()
        .filter(|name| !known.contains(name.as_str()))
        .collect())
}

pub async fn consolidate(
    source: &dyn CatalogSource,
    reporter: &dyn RefreshProgressReporter,
) -> FlattenResult<Consolidation> {
    reporter.report(RefreshProgressEvent::Discovering {
        source: source.name().to_string(),
    });

    let collections = source.list_collections().await?;
    let partitions = resolve_all(source, &collections).await?;

    for orphan in orphan_partitions(source, &partitions).await? {
        warn!(partition = %orphan, "partition has no collection registry entry; skipped");
    }

    let total = partitions.len() as u64;
    let mut items = Vec::new();
    let mut per_collection = HashMap::new();

    for (i, partition) in partitions.iter().enumerate() {
        let mut batch = source.read_partition(partition).await?;

        {
            let mut seen = HashSet::with_capacity(batch.len());
            for item in &batch {
                if !seen.insert(item.id.as_str()) {
                    return Err(FlattenError::DuplicateItem {
                        collection: partition.collection.id.clone(),
                        id: item.id.clone(),
                    });
                }
            }
        }
        batch.sort_by(|a, b| a.id.cmp(&b.id));

        debug!(
            partition = %partition.name,
            collection = %partition.collection.id,
            items = batch.len(),
            "partition copied"
        );
        per_collection.insert(partition.collection.id.clone(), batch.len() as u64);
        items.extend(batch);

        reporter.report(RefreshProgressEvent::Loading {
            partition: partition.name.clone(),
            n: i as u64 + 1,
            total,
        });
    }

    let fingerprint = fingerprint(&items);
    info!(
        collections = collections.len(),
        items = items.len(),
        "consolidated source partitions"
    );

    Ok(Consolidation {
        items,
        collections,
        per_collection,
        fingerprint,
    })
}

/// Content fingerprint of a flat item set.
///
/// Changes whenever an item is added, removed, or its row or content
/// changes. Used to tell whether a published version is stale.
pub fn fingerprint(items: &[CatalogItem]) -> String {
    let mut hasher = Sha256::new();
    for item in items {
        hasher.update(item.collection.as_bytes());
        hasher.update([0u8]);
        hasher.update(item.id.as_bytes());
        hasher.update([0u8]);
        if let Some(ts) = item.start_datetime {
            hasher.update(ts.timestamp_micros().to_le_bytes());
        }
        hasher.update([0u8]);
        if let Some(ts) = item.end_datetime {
            hasher.update(ts.timestamp_micros().to_le_bytes());
        }
        hasher.update([0u8]);
        if let Some(geom) = &item.geometry {
            hasher.update(geom.as_bytes());
        }
        hasher.update([0u8]);
        hasher.update(item.content.as_bytes());
        hasher.update([0xffu8]);
    }
    format!("{:x}", hasher.finalize())
}
