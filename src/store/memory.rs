//! In-memory [`FlatStore`] implementation.
//!
//! The published version lives behind one `Arc`; publishing builds the new
//! version completely and then swaps the pointer, so a reader holding the
//! previous `Arc` keeps a consistent view for as long as it needs it.

use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use super::FlatStore;
use crate::error::{FlattenError, FlattenResult};
use crate::models::{
    CatalogItem, GageByModel, GageSummary, LeveeDamElement, ModelGageLink, RefreshState,
    Snapshot, StormSummary,
};

/// A published version: the snapshot and the state recorded with it.
#[derive(Debug)]
pub struct Published {
    pub state: RefreshState,
    pub snapshot: Snapshot,
}

struct LockEntry {
    holder: String,
    acquired_at: i64,
}

pub struct MemoryFlatStore {
    current: RwLock<Option<Arc<Published>>>,
    lock: Mutex<Option<LockEntry>>,
}

impl MemoryFlatStore {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
            lock: Mutex::new(None),
        }
    }

    /// The currently published version.
    pub fn current(&self) -> Option<Arc<Published>> {
        self.current.read().unwrap().clone()
    }
}

impl Default for MemoryFlatStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lost_lock(current: Option<&LockEntry>) -> FlattenError {
    match current {
        Some(entry) => FlattenError::RefreshInProgress {
            holder: entry.holder.clone(),
            acquired_at: entry.acquired_at.to_string(),
        },
        None => FlattenError::RefreshInProgress {
            holder: "none (lock released)".to_string(),
            acquired_at: "-".to_string(),
        },
    }
}

fn matches_model(model_id: Option<&str>, candidate: &str) -> bool {
    model_id.map_or(true, |id| id == candidate)
}

#[async_trait]
impl FlatStore for MemoryFlatStore {
    async fn publish(&self, snapshot: &Snapshot, holder: &str) -> FlattenResult<RefreshState> {
        // Held across the swap so the lock cannot change hands mid-publish.
        let lock = self.lock.lock().unwrap();
        if !lock.as_ref().is_some_and(|entry| entry.holder == holder) {
            return Err(lost_lock(lock.as_ref()));
        }

        let previous = self.current().map(|p| p.state.version).unwrap_or(0);
        let state = RefreshState {
            version: previous + 1,
            refreshed_at: Utc::now(),
            item_count: snapshot.items.len() as u64,
            collection_count: snapshot.collection_count,
            source_fingerprint: snapshot.source_fingerprint.clone(),
            report: snapshot.derived.report.clone(),
        };
        let published = Arc::new(Published {
            state: state.clone(),
            snapshot: snapshot.clone(),
        });
        *self.current.write().unwrap() = Some(published);
        Ok(state)
    }

    async fn state(&self) -> FlattenResult<Option<RefreshState>> {
        Ok(self.current().map(|p| p.state.clone()))
    }

    async fn load_items(&self) -> FlattenResult<Vec<CatalogItem>> {
        Ok(self
            .current()
            .map(|p| p.snapshot.items.clone())
            .unwrap_or_default())
    }

    async fn gages_summary(&self) -> FlattenResult<Vec<GageSummary>> {
        Ok(self
            .current()
            .map(|p| p.snapshot.derived.gages_summary.clone())
            .unwrap_or_default())
    }

    async fn gages_by_model_id(&self, model_id: Option<&str>) -> FlattenResult<Vec<GageByModel>> {
        Ok(self
            .current()
            .map(|p| {
                p.snapshot
                    .derived
                    .gages_by_model_id
                    .iter()
                    .filter(|row| matches_model(model_id, &row.model_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn model_gage_links(&self, model_id: Option<&str>) -> FlattenResult<Vec<ModelGageLink>> {
        Ok(self
            .current()
            .map(|p| {
                p.snapshot
                    .derived
                    .model_gage_links
                    .iter()
                    .filter(|row| matches_model(model_id, &row.model_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn levee_dam_elements(&self, model_id: Option<&str>) -> FlattenResult<Vec<LeveeDamElement>> {
        Ok(self
            .current()
            .map(|p| {
                p.snapshot
                    .derived
                    .levee_dam_elements
                    .iter()
                    .filter(|row| matches_model(model_id, &row.model_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn storms_summary(&self) -> FlattenResult<Vec<StormSummary>> {
        Ok(self
            .current()
            .map(|p| p.snapshot.derived.storms_summary.clone())
            .unwrap_or_default())
    }

    async fn acquire_lock(&self, holder: &str, stale_after_secs: u64) -> FlattenResult<()> {
        let now = Utc::now().timestamp();
        let mut lock = self.lock.lock().unwrap();
        if let Some(entry) = lock.as_ref() {
            if entry.holder != holder {
                if now - entry.acquired_at < stale_after_secs as i64 {
                    return Err(FlattenError::RefreshInProgress {
                        holder: entry.holder.clone(),
                        acquired_at: entry.acquired_at.to_string(),
                    });
                }
                warn!(previous = %entry.holder, "taking over abandoned refresh lock");
            }
        }
        *lock = Some(LockEntry {
            holder: holder.to_string(),
            acquired_at: now,
        });
        Ok(())
    }

    async fn renew_lock(&self, holder: &str) -> FlattenResult<()> {
        let mut lock = self.lock.lock().unwrap();
        match lock.as_mut() {
            Some(entry) if entry.holder == holder => {
                entry.acquired_at = Utc::now().timestamp();
                Ok(())
            }
            other => Err(lost_lock(other.map(|entry| &*entry))),
        }
    }

    async fn release_lock(&self, holder: &str) -> FlattenResult<()> {
        let mut lock = self.lock.lock().unwrap();
        if lock.as_ref().is_some_and(|entry| entry.holder == holder) {
            *lock = None;
        }
        Ok(())
    }
}
