//! Destination storage for published versions.
//!
//! The [`FlatStore`] trait is the only way the refresh procedure writes
//! results and the only way consumers read them. Implementations must
//! publish a [`Snapshot`] atomically: a reader observes either the previous
//! complete version or the new one, never a mix and never an empty table
//! in between.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`publish`](FlatStore::publish) | Swap in a new version, bump `refresh_state` |
//! | [`state`](FlatStore::state) | Last published version and data-quality report |
//! | [`load_items`](FlatStore::load_items) | Published flat items (views-only refresh) |
//! | [`acquire_lock`](FlatStore::acquire_lock) / [`renew_lock`](FlatStore::renew_lock) / [`release_lock`](FlatStore::release_lock) | Single-writer refresh lock |
//! | `gages_summary` … `storms_summary` | Published derived views |

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::FlattenResult;
use crate::models::{
    CatalogItem, GageByModel, GageSummary, LeveeDamElement, ModelGageLink, RefreshState,
    Snapshot, StormSummary,
};

#[async_trait]
pub trait FlatStore: Send + Sync {
    /// Atomically replace the published version with `snapshot`.
    ///
    /// Fails with [`RefreshInProgress`](crate::error::FlattenError::RefreshInProgress)
    /// and publishes nothing unless `holder` still owns the refresh lock.
    async fn publish(&self, snapshot: &Snapshot, holder: &str) -> FlattenResult<RefreshState>;

    /// The last published version, `None` before the first refresh.
    async fn state(&self) -> FlattenResult<Option<RefreshState>>;

    async fn load_items(&self) -> FlattenResult<Vec<CatalogItem>>;

    async fn gages_summary(&self) -> FlattenResult<Vec<GageSummary>>;

    async fn gages_by_model_id(&self, model_id: Option<&str>) -> FlattenResult<Vec<GageByModel>>;

    async fn model_gage_links(&self, model_id: Option<&str>) -> FlattenResult<Vec<ModelGageLink>>;

    async fn levee_dam_elements(&self, model_id: Option<&str>) -> FlattenResult<Vec<LeveeDamElement>>;

    async fn storms_summary(&self) -> FlattenResult<Vec<StormSummary>>;

    /// Take the refresh lock for `holder`.
    ///
    /// Fails with [`RefreshInProgress`](crate::error::FlattenError::RefreshInProgress)
    /// while another holder owns a lock younger than `stale_after_secs`.
    async fn acquire_lock(&self, holder: &str, stale_after_secs: u64) -> FlattenResult<()>;

    /// Reset the age of a lock `holder` still owns.
    ///
    /// Fails with [`RefreshInProgress`](crate::error::FlattenError::RefreshInProgress)
    /// when the lock was taken over or released in the meantime.
    async fn renew_lock(&self, holder: &str) -> FlattenResult<()>;

    /// Release the lock if `holder` still owns it.
    async fn release_lock(&self, holder: &str) -> FlattenResult<()>;
}
