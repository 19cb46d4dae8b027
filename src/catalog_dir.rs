//! Directory catalog source.
//!
//! Reads a pgstac dump laid out on disk:
//!
//! ```text
//! dump/
//! ├── collections.json        [{"key": 1, "id": "gages"}, ...]
//! ├── _items_1.ndjson         one STAC item per line
//! └── _items_2.ndjson
//! ```
//!
//! Each line of a partition file is a STAC item. The line text is kept
//! verbatim as the item content; id, collection, temporal extent and
//! geometry are projected out of it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use walkdir::WalkDir;

use crate::catalog::CatalogSource;
use crate::error::{FlattenError, FlattenResult};
use crate::models::{partition_name, CatalogItem, CollectionEntry, Partition};

const REGISTRY_FILE: &str = "collections.json";
const PARTITION_EXT: &str = "ndjson";

pub struct DirectoryCatalog {
    root: PathBuf,
    label: String,
    partition_set: GlobSet,
}

impl DirectoryCatalog {
    pub fn new(root: &Path) -> FlattenResult<Self> {
        if !root.is_dir() {
            return Err(FlattenError::Source(format!(
                "catalog directory does not exist: {}",
                root.display()
            )));
        }
        let partition_set = build_globset(&[format!("_items_*.{}", PARTITION_EXT)])?;
        Ok(Self {
            root: root.to_path_buf(),
            label: format!("directory:{}", root.display()),
            partition_set,
        })
    }

    fn partition_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.{}", name, PARTITION_EXT))
    }
}

#[derive(Debug, Deserialize)]
struct ItemHeader {
    id: String,
    #[serde(default)]
    collection: Option<String>,
    #[serde(default)]
    geometry: Option<serde_json::Value>,
    #[serde(default)]
    properties: ItemTimes,
}

#[derive(Debug, Default, Deserialize)]
struct ItemTimes {
    #[serde(default)]
    datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    start_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    end_datetime: Option<DateTime<Utc>>,
}

fn parse_line(line: &str, partition: &Partition) -> FlattenResult<CatalogItem> {
    let header: ItemHeader =
        serde_json::from_str(line).map_err(|e| FlattenError::InvalidItem {
            partition: partition.name.clone(),
            reason: e.to_string(),
        })?;

    if let Some(collection) = &header.collection {
        if collection != &partition.collection.id {
            return Err(FlattenError::InvalidItem {
                partition: partition.name.clone(),
                reason: format!(
                    "item '{}' claims collection '{}', partition belongs to '{}'",
                    header.id, collection, partition.collection.id
                ),
            });
        }
    }

    let geometry = match header.geometry {
        Some(serde_json::Value::Null) | None => None,
        Some(geom) => Some(serde_json::to_string(&geom)?),
    };

    Ok(CatalogItem {
        id: header.id,
        collection: partition.collection.id.clone(),
        start_datetime: header.properties.start_datetime.or(header.properties.datetime),
        end_datetime: header.properties.end_datetime.or(header.properties.datetime),
        geometry,
        content: line.to_string(),
    })
}

#[async_trait]
impl CatalogSource for DirectoryCatalog {
    fn name(&self) -> &str {
        &self.label
    }

    async fn list_collections(&self) -> FlattenResult<Vec<CollectionEntry>> {
        let path = self.root.join(REGISTRY_FILE);
        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
            FlattenError::Source(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut entries: Vec<CollectionEntry> = serde_json::from_str(&raw)?;
        entries.sort_by_key(|e| e.key);
        entries.dedup_by_key(|e| e.key);
        Ok(entries)
    }

    async fn resolve_partition(&self, entry: &CollectionEntry) -> FlattenResult<Option<Partition>> {
        let name = partition_name(entry.key);
        let exists = tokio::fs::try_exists(self.partition_path(&name)).await?;
        Ok(exists.then(|| Partition {
            collection: entry.clone(),
            name,
        }))
    }

    async fn list_partitions(&self) -> FlattenResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| FlattenError::Source(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !self.partition_set.is_match(&file_name) {
                continue;
            }
            if let Some(stem) = file_name.strip_suffix(&format!(".{}", PARTITION_EXT)) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn read_partition(&self, partition: &Partition) -> FlattenResult<Vec<CatalogItem>> {
        let path = self.partition_path(&partition.name);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FlattenError::SchemaDrift {
                    collection: partition.collection.id.clone(),
                    key: partition.collection.key,
                    partition: partition.name.clone(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        raw.lines()
            .map(str::trim_end)
            .filter(|line| !line.trim().is_empty())
            .map(|line| parse_line(line, partition))
            .collect()
    }
}

fn build_globset(patterns: &[String]) -> FlattenResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(|e| FlattenError::Source(e.to_string()))?);
    }
    builder
        .build()
        .map_err(|e| FlattenError::Source(e.to_string()))
}
