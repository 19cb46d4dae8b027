//! Refresh orchestration.
//!
//! Coordinates the full flow: lock → consolidate → extract → join →
//! publish → unlock. A failure at any step leaves the previously published
//! version in place, and the lock is released on every path. The lock is
//! renewed between phases; a refresher that finds it taken over stops
//! without publishing.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::{open_source, CatalogSource};
use crate::config::Config;
use crate::consolidate::consolidate;
use crate::error::{FlattenError, FlattenResult};
use crate::extract::{extract_all, ExtractRules};
use crate::models::{ExtractReport, RefreshState, Snapshot};
use crate::progress::{NoProgress, RefreshProgressEvent, RefreshProgressReporter};
use crate::store::sqlite::SqliteFlatStore;
use crate::store::FlatStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Re-copy every partition from the source, then derive.
    Full,
    /// Keep the published flat items and only recompute derived results.
    ViewsOnly,
}

/// What a refresh computed, and what it published if it did.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub mode: RefreshMode,
    pub item_count: u64,
    pub collection_count: u64,
    pub source_fingerprint: String,
    pub report: ExtractReport,
    /// `None` for a dry run.
    pub published: Option<RefreshState>,
}

/// Whether the published version still matches the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale { published: String, current: String },
    NeverRefreshed,
}

pub struct Refresher<'a> {
    config: &'a Config,
    store: &'a dyn FlatStore,
    source: Option<&'a dyn CatalogSource>,
}

impl<'a> Refresher<'a> {
    pub fn new(config: &'a Config, store: &'a dyn FlatStore) -> Self {
        Self {
            config,
            store,
            source: None,
        }
    }

    pub fn with_source(mut self, source: &'a dyn CatalogSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Run one refresh under the single-writer lock.
    ///
    /// A dry run computes everything and publishes nothing, so it does not
    /// take the lock.
    pub async fn refresh(
        &self,
        mode: RefreshMode,
        dry_run: bool,
        reporter: &dyn RefreshProgressReporter,
    ) -> FlattenResult<RefreshOutcome> {
        if dry_run {
            return self.run(mode, None, reporter).await;
        }

        let holder = Uuid::new_v4().to_string();
        self.store
            .acquire_lock(&holder, self.config.refresh.lock_timeout_secs)
            .await?;

        let result = self.run(mode, Some(&holder), reporter).await;

        if let Err(e) = self.store.release_lock(&holder).await {
            warn!(error = %e, holder = %holder, "failed to release refresh lock");
        }
        result
    }

    async fn run(
        &self,
        mode: RefreshMode,
        holder: Option<&str>,
        reporter: &dyn RefreshProgressReporter,
    ) -> FlattenResult<RefreshOutcome> {
        let rules = ExtractRules::from_config(self.config)?;

        let (items, collection_count, source_fingerprint) = match mode {
            RefreshMode::Full => {
                let source = self.source.ok_or_else(|| {
                    FlattenError::Source("full refresh requires a catalog source".to_string())
                })?;
                let consolidation = consolidate(source, reporter).await?;
                (
                    consolidation.items,
                    consolidation.collections.len() as u64,
                    consolidation.fingerprint,
                )
            }
            RefreshMode::ViewsOnly => {
                let state = self
                    .store
                    .state()
                    .await?
                    .ok_or(FlattenError::NothingPublished)?;
                let items = self.store.load_items().await?;
                (items, state.collection_count, state.source_fingerprint)
            }
        };
        self.renew(holder).await?;

        reporter.report(RefreshProgressEvent::Extracting {
            items: items.len() as u64,
        });
        let items = Arc::new(items);
        let derived = extract_all(Arc::clone(&items), &rules).await?;
        let items = Arc::try_unwrap(items).unwrap_or_else(|shared| (*shared).clone());
        self.renew(holder).await?;

        let snapshot = Snapshot {
            items,
            collection_count,
            source_fingerprint,
            derived,
        };

        let published = if let Some(holder) = holder {
            reporter.report(RefreshProgressEvent::Publishing);
            let state = self.store.publish(&snapshot, holder).await?;
            info!(
                version = state.version,
                items = state.item_count,
                collections = state.collection_count,
                "published new version"
            );
            Some(state)
        } else {
            None
        };

        Ok(RefreshOutcome {
            mode,
            item_count: snapshot.items.len() as u64,
            collection_count: snapshot.collection_count,
            source_fingerprint: snapshot.source_fingerprint,
            report: snapshot.derived.report,
            published,
        })
    }

    async fn renew(&self, holder: Option<&str>) -> FlattenResult<()> {
        let Some(holder) = holder else {
            return Ok(());
        };
        if let Err(e) = self.store.renew_lock(holder).await {
            warn!(error = %e, holder = %holder, "refresh lock was taken over, abandoning refresh");
            return Err(e);
        }
        Ok(())
    }
}

/// Compare the published fingerprint with one computed from the live source.
pub async fn check_freshness(
    source: &dyn CatalogSource,
    store: &dyn FlatStore,
) -> FlattenResult<Freshness> {
    let Some(state) = store.state().await? else {
        return Ok(Freshness::NeverRefreshed);
    };
    let current = consolidate(source, &NoProgress).await?.fingerprint;
    if current == state.source_fingerprint {
        Ok(Freshness::Fresh)
    } else {
        Ok(Freshness::Stale {
            published: state.source_fingerprint,
            current,
        })
    }
}

/// `flatstac refresh`: refresh the configured store from the configured source.
pub async fn run_refresh(
    config: &Config,
    mode: RefreshMode,
    dry_run: bool,
    reporter: &dyn RefreshProgressReporter,
) -> Result<()> {
    let store = SqliteFlatStore::open(config).await?;

    let source = match mode {
        RefreshMode::Full => Some(open_source(config).await?),
        RefreshMode::ViewsOnly => None,
    };
    let mut refresher = Refresher::new(config, &store);
    if let Some(source) = source.as_deref() {
        refresher = refresher.with_source(source);
    }

    let outcome = refresher.refresh(mode, dry_run, reporter).await?;
    store.close().await;

    let label = match mode {
        RefreshMode::Full => "refresh",
        RefreshMode::ViewsOnly => "refresh --views-only",
    };
    if dry_run {
        println!("{} (dry-run)", label);
    } else {
        println!("{}", label);
    }
    println!("  collections: {}", outcome.collection_count);
    println!("  items: {}", outcome.item_count);
    println!("  asset references: {}", outcome.report.asset_references);
    println!("  malformed gage ids: {}", outcome.report.malformed_gage_ids);
    println!("  unclassified elements: {}", outcome.report.unclassified_elements);
    println!("  join misses: {}", outcome.report.join_misses);
    println!("  decode issues: {}", outcome.report.decode_issue_count);
    println!("  fingerprint: {}", outcome.source_fingerprint);
    if let Some(state) = &outcome.published {
        println!("  version: {}", state.version);
    }
    println!("ok");
    Ok(())
}
