use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Tables that are rebuilt and swapped in on every publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishedTable {
    FlatItems,
    GagesSummary,
    ModelGageLinks,
    GagesByModelId,
    LeveeDamElements,
    StormsSummary,
}

impl PublishedTable {
    pub const ALL: [PublishedTable; 6] = [
        PublishedTable::FlatItems,
        PublishedTable::GagesSummary,
        PublishedTable::ModelGageLinks,
        PublishedTable::GagesByModelId,
        PublishedTable::LeveeDamElements,
        PublishedTable::StormsSummary,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PublishedTable::FlatItems => "flat_items",
            PublishedTable::GagesSummary => "gages_summary",
            PublishedTable::ModelGageLinks => "model_gage_links",
            PublishedTable::GagesByModelId => "gages_by_model_id",
            PublishedTable::LeveeDamElements => "levee_dam_elements",
            PublishedTable::StormsSummary => "storms_summary",
        }
    }

    /// Name of the table the next version is built in before the swap.
    pub fn staging_name(&self) -> String {
        format!("{}__next", self.name())
    }

    fn columns(&self) -> &'static str {
        match self {
            PublishedTable::FlatItems => {
                r#"
                id TEXT NOT NULL,
                collection TEXT NOT NULL,
                start_datetime TEXT,
                end_datetime TEXT,
                geometry TEXT,
                content TEXT NOT NULL,
                PRIMARY KEY (collection, id)
                "#
            }
            PublishedTable::GagesSummary => {
                r#"
                gage_id TEXT PRIMARY KEY,
                station_name TEXT,
                start_datetime TEXT,
                end_datetime TEXT,
                geometry TEXT
                "#
            }
            PublishedTable::ModelGageLinks => {
                r#"
                model_id TEXT NOT NULL,
                collection TEXT NOT NULL,
                asset_key TEXT NOT NULL,
                ref_line TEXT NOT NULL,
                gage_id TEXT
                "#
            }
            PublishedTable::GagesByModelId => {
                r#"
                model_id TEXT NOT NULL,
                asset_key TEXT NOT NULL,
                ref_line TEXT NOT NULL,
                gage_id TEXT NOT NULL,
                station_name TEXT,
                start_datetime TEXT,
                end_datetime TEXT,
                geometry TEXT
                "#
            }
            PublishedTable::LeveeDamElements => {
                r#"
                model_id TEXT NOT NULL,
                collection TEXT NOT NULL,
                asset_key TEXT NOT NULL,
                element TEXT NOT NULL,
                source TEXT NOT NULL,
                element_type TEXT NOT NULL CHECK (element_type IN ('levee', 'dam'))
                "#
            }
            PublishedTable::StormsSummary => {
                r#"
                storm_id TEXT PRIMARY KEY,
                start_datetime TEXT,
                end_datetime TEXT,
                storm_type TEXT,
                tropical_storm TEXT,
                precip_min REAL,
                precip_mean REAL,
                precip_max REAL,
                geometry TEXT
                "#
            }
        }
    }

    /// `CREATE TABLE` for this table under an arbitrary name.
    pub fn create_sql(&self, table_name: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            table_name,
            self.columns()
        )
    }

    /// Indexes on the published (non-staging) name.
    pub fn index_sql(&self) -> Vec<String> {
        let cols: &[&str] = match self {
            PublishedTable::FlatItems => &["collection"],
            PublishedTable::GagesSummary => &[],
            PublishedTable::ModelGageLinks => &["model_id", "gage_id"],
            PublishedTable::GagesByModelId => &["model_id", "gage_id"],
            PublishedTable::LeveeDamElements => &["model_id"],
            PublishedTable::StormsSummary => &[],
        };
        cols.iter()
            .map(|col| {
                format!(
                    "CREATE INDEX IF NOT EXISTS idx_{table}_{col} ON {table}({col})",
                    table = self.name(),
                    col = col
                )
            })
            .collect()
    }
}

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    ensure_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table the store needs. Idempotent.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for table in PublishedTable::ALL {
        sqlx::query(&table.create_sql(table.name()))
            .execute(pool)
            .await?;
        for index in table.index_sql() {
            sqlx::query(&index).execute(pool).await?;
        }
    }

    // Single row describing the published version
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS refresh_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL,
            refreshed_at TEXT NOT NULL,
            item_count INTEGER NOT NULL,
            collection_count INTEGER NOT NULL,
            source_fingerprint TEXT NOT NULL,
            report_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Advisory single-writer lock
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS refresh_lock (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            holder TEXT NOT NULL,
            acquired_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
