//! In-memory [`CatalogSource`] for library callers and tests.
//!
//! Registry entries and partitions are kept separately so callers can model
//! a registry that has drifted away from the physical partitions.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::catalog::CatalogSource;
use crate::error::{FlattenError, FlattenResult};
use crate::models::{partition_name, CatalogItem, CollectionEntry, Partition};

pub struct MemoryCatalog {
    registry: RwLock<Vec<CollectionEntry>>,
    partitions: RwLock<BTreeMap<String, Vec<CatalogItem>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Vec::new()),
            partitions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a collection and create its (empty) partition.
    pub fn add_collection(&self, key: i64, id: &str) {
        self.register(key, id);
        self.partitions
            .write()
            .unwrap()
            .entry(partition_name(key))
            .or_default();
    }

    /// Register a collection without creating a partition.
    pub fn register(&self, key: i64, id: &str) {
        let mut registry = self.registry.write().unwrap();
        if !registry.iter().any(|e| e.key == key) {
            registry.push(CollectionEntry {
                key,
                id: id.to_string(),
            });
        }
    }

    /// Drop a physical partition, leaving the registry entry behind.
    pub fn drop_partition(&self, key: i64) {
        self.partitions.write().unwrap().remove(&partition_name(key));
    }

    /// Append an item to the partition of collection `key`.
    pub fn insert(&self, key: i64, item: CatalogItem) {
        self.partitions
            .write()
            .unwrap()
            .entry(partition_name(key))
            .or_default()
            .push(item);
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogSource for MemoryCatalog {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_collections(&self) -> FlattenResult<Vec<CollectionEntry>> {
        let mut entries = self.registry.read().unwrap().clone();
        entries.sort_by_key(|e| e.key);
        Ok(entries)
    }

    async fn resolve_partition(&self, entry: &CollectionEntry) -> FlattenResult<Option<Partition>> {
        let name = partition_name(entry.key);
        let exists = self.partitions.read().unwrap().contains_key(&name);
        Ok(exists.then(|| Partition {
            collection: entry.clone(),
            name,
        }))
    }

    async fn list_partitions(&self) -> FlattenResult<Vec<String>> {
        Ok(self.partitions.read().unwrap().keys().cloned().collect())
    }

    async fn read_partition(&self, partition: &Partition) -> FlattenResult<Vec<CatalogItem>> {
        self.partitions
            .read()
            .unwrap()
            .get(&partition.name)
            .cloned()
            .ok_or_else(|| FlattenError::SchemaDrift {
                collection: partition.collection.id.clone(),
                key: partition.collection.key,
                partition: partition.name.clone(),
            })
    }
}
