//! SQLite-backed [`FlatStore`].
//!
//! Every publish builds each table of the new version under a staging name
//! (`<table>__next`), then drops the published table and renames the staging
//! table into place, all inside one transaction. Readers on other
//! connections keep seeing the previous committed version until the commit,
//! and a failure anywhere rolls back to that version untouched.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, warn};

use super::FlatStore;
use crate::config::Config;
use crate::db;
use crate::error::{FlattenError, FlattenResult};
use crate::migrate::{ensure_schema, PublishedTable};
use crate::models::{
    CatalogItem, ElementType, ExtractReport, GageByModel, GageSummary, LeveeDamElement,
    ModelGageLink, ReferenceKind, RefreshState, Snapshot, StormSummary,
};

pub struct SqliteFlatStore {
    pool: SqlitePool,
}

impl SqliteFlatStore {
    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        ensure_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

async fn write_staging(tx: &mut Transaction<'_, Sqlite>, snapshot: &Snapshot) -> FlattenResult<()> {
    for table in PublishedTable::ALL {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table.staging_name()))
            .execute(&mut **tx)
            .await?;
        sqlx::query(&table.create_sql(&table.staging_name()))
            .execute(&mut **tx)
            .await?;
    }

    let sql = format!(
        "INSERT INTO {} (id, collection, start_datetime, end_datetime, geometry, content) VALUES (?, ?, ?, ?, ?, ?)",
        PublishedTable::FlatItems.staging_name()
    );
    for item in &snapshot.items {
        sqlx::query(&sql)
            .bind(&item.id)
            .bind(&item.collection)
            .bind(item.start_datetime)
            .bind(item.end_datetime)
            .bind(&item.geometry)
            .bind(&item.content)
            .execute(&mut **tx)
            .await?;
    }

    let derived = &snapshot.derived;

    let sql = format!(
        "INSERT INTO {} (gage_id, station_name, start_datetime, end_datetime, geometry) VALUES (?, ?, ?, ?, ?)",
        PublishedTable::GagesSummary.staging_name()
    );
    for gage in &derived.gages_summary {
        sqlx::query(&sql)
            .bind(&gage.gage_id)
            .bind(&gage.station_name)
            .bind(gage.start_datetime)
            .bind(gage.end_datetime)
            .bind(&gage.geometry)
            .execute(&mut **tx)
            .await?;
    }

    let sql = format!(
        "INSERT INTO {} (model_id, collection, asset_key, ref_line, gage_id) VALUES (?, ?, ?, ?, ?)",
        PublishedTable::ModelGageLinks.staging_name()
    );
    for link in &derived.model_gage_links {
        sqlx::query(&sql)
            .bind(&link.model_id)
            .bind(&link.collection)
            .bind(&link.asset_key)
            .bind(&link.ref_line)
            .bind(&link.gage_id)
            .execute(&mut **tx)
            .await?;
    }

    let sql = format!(
        r#"INSERT INTO {} (model_id, asset_key, ref_line, gage_id, station_name, start_datetime, end_datetime, geometry)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        PublishedTable::GagesByModelId.staging_name()
    );
    for row in &derived.gages_by_model_id {
        sqlx::query(&sql)
            .bind(&row.model_id)
            .bind(&row.asset_key)
            .bind(&row.ref_line)
            .bind(&row.gage_id)
            .bind(&row.station_name)
            .bind(row.start_datetime)
            .bind(row.end_datetime)
            .bind(&row.geometry)
            .execute(&mut **tx)
            .await?;
    }

    let sql = format!(
        "INSERT INTO {} (model_id, collection, asset_key, element, source, element_type) VALUES (?, ?, ?, ?, ?, ?)",
        PublishedTable::LeveeDamElements.staging_name()
    );
    for element in &derived.levee_dam_elements {
        sqlx::query(&sql)
            .bind(&element.model_id)
            .bind(&element.collection)
            .bind(&element.asset_key)
            .bind(&element.element)
            .bind(element.source.as_str())
            .bind(element.element_type.as_str())
            .execute(&mut **tx)
            .await?;
    }

    let sql = format!(
        r#"INSERT INTO {} (storm_id, start_datetime, end_datetime, storm_type, tropical_storm,
                          precip_min, precip_mean, precip_max, geometry)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        PublishedTable::StormsSummary.staging_name()
    );
    for storm in &derived.storms_summary {
        sqlx::query(&sql)
            .bind(&storm.storm_id)
            .bind(storm.start_datetime)
            .bind(storm.end_datetime)
            .bind(&storm.storm_type)
            .bind(&storm.tropical_storm)
            .bind(storm.precip_min)
            .bind(storm.precip_mean)
            .bind(storm.precip_max)
            .bind(&storm.geometry)
            .execute(&mut **tx)
            .await?;
    }

    Ok(())
}

async fn swap_in(tx: &mut Transaction<'_, Sqlite>) -> FlattenResult<()> {
    for table in PublishedTable::ALL {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table.name()))
            .execute(&mut **tx)
            .await?;
        sqlx::query(&format!(
            "ALTER TABLE {} RENAME TO {}",
            table.staging_name(),
            table.name()
        ))
        .execute(&mut **tx)
        .await?;
        for index in table.index_sql() {
            sqlx::query(&index).execute(&mut **tx).await?;
        }
    }
    Ok(())
}

fn state_from_row(row: &SqliteRow) -> FlattenResult<RefreshState> {
    let report_json: String = row.get("report_json");
    let report: ExtractReport = serde_json::from_str(&report_json)?;
    let item_count: i64 = row.get("item_count");
    let collection_count: i64 = row.get("collection_count");
    Ok(RefreshState {
        version: row.get("version"),
        refreshed_at: row.get("refreshed_at"),
        item_count: item_count as u64,
        collection_count: collection_count as u64,
        source_fingerprint: row.get("source_fingerprint"),
        report,
    })
}

/// Error for a lock row that is held by someone else, or gone.
fn lost_lock(current: Option<(String, i64)>) -> FlattenError {
    match current {
        Some((holder, acquired_at)) => FlattenError::RefreshInProgress {
            holder,
            acquired_at: DateTime::<Utc>::from_timestamp(acquired_at, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| acquired_at.to_string()),
        },
        None => FlattenError::RefreshInProgress {
            holder: "none (lock released)".to_string(),
            acquired_at: "-".to_string(),
        },
    }
}

fn model_filter(table: PublishedTable, columns: &str, model_id: Option<&str>) -> String {
    match model_id {
        Some(_) => format!(
            "SELECT {} FROM {} WHERE model_id = ? ORDER BY rowid",
            columns,
            table.name()
        ),
        None => format!("SELECT {} FROM {} ORDER BY rowid", columns, table.name()),
    }
}

#[async_trait]
impl FlatStore for SqliteFlatStore {
    async fn publish(&self, snapshot: &Snapshot, holder: &str) -> FlattenResult<RefreshState> {
        let mut tx = self.pool.begin().await?;

        // First statement is a write so the transaction holds the write lock
        // from here on; a takeover cannot land between this check and commit.
        let owned = sqlx::query("UPDATE refresh_lock SET acquired_at = ? WHERE id = 1 AND holder = ?")
            .bind(Utc::now().timestamp())
            .bind(holder)
            .execute(&mut *tx)
            .await?;
        if owned.rows_affected() == 0 {
            let current: Option<(String, i64)> =
                sqlx::query_as("SELECT holder, acquired_at FROM refresh_lock WHERE id = 1")
                    .fetch_optional(&mut *tx)
                    .await?;
            return Err(lost_lock(current));
        }

        let previous: Option<i64> =
            sqlx::query_scalar("SELECT version FROM refresh_state WHERE id = 1")
                .fetch_optional(&mut *tx)
                .await?;

        write_staging(&mut tx, snapshot).await?;
        swap_in(&mut tx).await?;

        let state = RefreshState {
            version: previous.unwrap_or(0) + 1,
            refreshed_at: Utc::now(),
            item_count: snapshot.items.len() as u64,
            collection_count: snapshot.collection_count,
            source_fingerprint: snapshot.source_fingerprint.clone(),
            report: snapshot.derived.report.clone(),
        };
        let report_json = serde_json::to_string(&state.report)?;

        sqlx::query(
            r#"
            INSERT INTO refresh_state (id, version, refreshed_at, item_count, collection_count, source_fingerprint, report_json)
            VALUES (1, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                version = excluded.version,
                refreshed_at = excluded.refreshed_at,
                item_count = excluded.item_count,
                collection_count = excluded.collection_count,
                source_fingerprint = excluded.source_fingerprint,
                report_json = excluded.report_json
            "#,
        )
        .bind(state.version)
        .bind(state.refreshed_at)
        .bind(state.item_count as i64)
        .bind(state.collection_count as i64)
        .bind(&state.source_fingerprint)
        .bind(&report_json)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(version = state.version, items = state.item_count, "published");
        Ok(state)
    }

    async fn state(&self) -> FlattenResult<Option<RefreshState>> {
        let row = sqlx::query(
            r#"
            SELECT version, refreshed_at, item_count, collection_count, source_fingerprint, report_json
            FROM refresh_state WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(state_from_row).transpose()
    }

    async fn load_items(&self) -> FlattenResult<Vec<CatalogItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, collection, start_datetime, end_datetime, geometry, content
            FROM flat_items ORDER BY rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| CatalogItem {
                id: row.get("id"),
                collection: row.get("collection"),
                start_datetime: row.get("start_datetime"),
                end_datetime: row.get("end_datetime"),
                geometry: row.get("geometry"),
                content: row.get("content"),
            })
            .collect())
    }

    async fn gages_summary(&self) -> FlattenResult<Vec<GageSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT gage_id, station_name, start_datetime, end_datetime, geometry
            FROM gages_summary ORDER BY rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| GageSummary {
                gage_id: row.get("gage_id"),
                station_name: row.get("station_name"),
                start_datetime: row.get("start_datetime"),
                end_datetime: row.get("end_datetime"),
                geometry: row.get("geometry"),
            })
            .collect())
    }

    async fn gages_by_model_id(&self, model_id: Option<&str>) -> FlattenResult<Vec<GageByModel>> {
        let sql = model_filter(
            PublishedTable::GagesByModelId,
            "model_id, asset_key, ref_line, gage_id, station_name, start_datetime, end_datetime, geometry",
            model_id,
        );
        let mut query = sqlx::query(&sql);
        if let Some(id) = model_id {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| GageByModel {
                model_id: row.get("model_id"),
                asset_key: row.get("asset_key"),
                ref_line: row.get("ref_line"),
                gage_id: row.get("gage_id"),
                station_name: row.get("station_name"),
                start_datetime: row.get("start_datetime"),
                end_datetime: row.get("end_datetime"),
                geometry: row.get("geometry"),
            })
            .collect())
    }

    async fn model_gage_links(&self, model_id: Option<&str>) -> FlattenResult<Vec<ModelGageLink>> {
        let sql = model_filter(
            PublishedTable::ModelGageLinks,
            "model_id, collection, asset_key, ref_line, gage_id",
            model_id,
        );
        let mut query = sqlx::query(&sql);
        if let Some(id) = model_id {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| ModelGageLink {
                model_id: row.get("model_id"),
                collection: row.get("collection"),
                asset_key: row.get("asset_key"),
                ref_line: row.get("ref_line"),
                gage_id: row.get("gage_id"),
            })
            .collect())
    }

    async fn levee_dam_elements(&self, model_id: Option<&str>) -> FlattenResult<Vec<LeveeDamElement>> {
        let sql = model_filter(
            PublishedTable::LeveeDamElements,
            "model_id, collection, asset_key, element, source, element_type",
            model_id,
        );
        let mut query = sqlx::query(&sql);
        if let Some(id) = model_id {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let source: String = row.get("source");
            let element_type: String = row.get("element_type");
            out.push(LeveeDamElement {
                model_id: row.get("model_id"),
                collection: row.get("collection"),
                asset_key: row.get("asset_key"),
                element: row.get("element"),
                source: ReferenceKind::parse(&source).ok_or_else(|| {
                    FlattenError::Source(format!("unknown reference kind '{}' in store", source))
                })?,
                element_type: ElementType::parse(&element_type).ok_or_else(|| {
                    FlattenError::Source(format!("unknown element type '{}' in store", element_type))
                })?,
            });
        }
        Ok(out)
    }

    async fn storms_summary(&self) -> FlattenResult<Vec<StormSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT storm_id, start_datetime, end_datetime, storm_type, tropical_storm,
                   precip_min, precip_mean, precip_max, geometry
            FROM storms_summary ORDER BY rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| StormSummary {
                storm_id: row.get("storm_id"),
                start_datetime: row.get("start_datetime"),
                end_datetime: row.get("end_datetime"),
                storm_type: row.get("storm_type"),
                tropical_storm: row.get("tropical_storm"),
                precip_min: row.get("precip_min"),
                precip_mean: row.get("precip_mean"),
                precip_max: row.get("precip_max"),
                geometry: row.get("geometry"),
            })
            .collect())
    }

    async fn acquire_lock(&self, holder: &str, stale_after_secs: u64) -> FlattenResult<()> {
        let now = Utc::now().timestamp();
        let cutoff = now - stale_after_secs as i64;

        let previous: Option<(String, i64)> =
            sqlx::query_as("SELECT holder, acquired_at FROM refresh_lock WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        // Only succeeds when the row is absent, stale, or already ours.
        let result = sqlx::query(
            r#"
            INSERT INTO refresh_lock (id, holder, acquired_at) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                holder = excluded.holder,
                acquired_at = excluded.acquired_at
            WHERE refresh_lock.acquired_at <= ? OR refresh_lock.holder = excluded.holder
            "#,
        )
        .bind(holder)
        .bind(now)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current: Option<(String, i64)> =
                sqlx::query_as("SELECT holder, acquired_at FROM refresh_lock WHERE id = 1")
                    .fetch_optional(&self.pool)
                    .await?;
            return Err(lost_lock(current));
        }

        if let Some((previous, _)) = previous.filter(|(h, _)| h != holder) {
            warn!(previous = %previous, "taking over abandoned refresh lock");
        }
        Ok(())
    }

    async fn renew_lock(&self, holder: &str) -> FlattenResult<()> {
        let result = sqlx::query("UPDATE refresh_lock SET acquired_at = ? WHERE id = 1 AND holder = ?")
            .bind(Utc::now().timestamp())
            .bind(holder)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            let current: Option<(String, i64)> =
                sqlx::query_as("SELECT holder, acquired_at FROM refresh_lock WHERE id = 1")
                    .fetch_optional(&self.pool)
                    .await?;
            return Err(lost_lock(current));
        }
        Ok(())
    }

    async fn release_lock(&self, holder: &str) -> FlattenResult<()> {
        sqlx::query("DELETE FROM refresh_lock WHERE id = 1 AND holder = ?")
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
