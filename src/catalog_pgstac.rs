//! Live pgstac catalog source.
//!
//! Reads the collection registry (`<schema>.collections`) and the
//! per-collection item partitions (`<schema>._items_<key>`) over a sqlx
//! Postgres pool. A partition name is only interpolated into SQL after
//! `to_regclass` confirmed that exactly that relation exists; the key is an
//! integer and the schema a validated identifier.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use crate::catalog::CatalogSource;
use crate::error::{FlattenError, FlattenResult};
use crate::models::{partition_name, CatalogItem, CollectionEntry, Partition};

/// Relation names that hold the items of one collection.
const PARTITION_PATTERN: &str = "^_items_[0-9]+$";

pub struct PgstacCatalog {
    pool: PgPool,
    schema: String,
    label: String,
}

impl PgstacCatalog {
    pub async fn connect(url: &str, schema: &str, max_connections: u32) -> FlattenResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool, schema))
    }

    pub fn new(pool: PgPool, schema: &str) -> Self {
        Self {
            pool,
            schema: schema.to_string(),
            label: format!("pgstac:{}", schema),
        }
    }

    fn qualified(&self, name: &str) -> String {
        format!("{}.{}", self.schema, name)
    }
}

#[async_trait]
impl CatalogSource for PgstacCatalog {
    fn name(&self) -> &str {
        &self.label
    }

    async fn list_collections(&self) -> FlattenResult<Vec<CollectionEntry>> {
        let sql = format!(
            "SELECT DISTINCT ON (key) key::bigint AS key, id FROM {} ORDER BY key",
            self.qualified("collections")
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| CollectionEntry {
                key: row.get("key"),
                id: row.get("id"),
            })
            .collect())
    }

    async fn resolve_partition(&self, entry: &CollectionEntry) -> FlattenResult<Option<Partition>> {
        let name = partition_name(entry.key);
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(self.qualified(&name))
            .fetch_one(&self.pool)
            .await?;
        Ok(exists.then(|| Partition {
            collection: entry.clone(),
            name,
        }))
    }

    async fn list_partitions(&self) -> FlattenResult<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT c.relname::text
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1
              AND c.relname ~ $2
              AND c.relkind IN ('r', 'p')
            ORDER BY c.relname
            "#,
        )
        .bind(&self.schema)
        .bind(PARTITION_PATTERN)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn read_partition(&self, partition: &Partition) -> FlattenResult<Vec<CatalogItem>> {
        // Re-check right before use; the registry may have drifted since
        // resolve_partition ran.
        if self.resolve_partition(&partition.collection).await?.is_none() {
            return Err(FlattenError::SchemaDrift {
                collection: partition.collection.id.clone(),
                key: partition.collection.key,
                partition: partition.name.clone(),
            });
        }

        let sql = format!(
            r#"
            SELECT id,
                   collection,
                   datetime,
                   end_datetime,
                   ST_AsGeoJSON(geometry) AS geometry,
                   content::text AS content
            FROM {}
            ORDER BY id
            "#,
            self.qualified(&partition.name)
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                let collection: String = row.try_get("collection")?;
                if collection != partition.collection.id {
                    return Err(FlattenError::InvalidItem {
                        partition: partition.name.clone(),
                        reason: format!(
                            "row collection '{}' does not match registry id '{}'",
                            collection, partition.collection.id
                        ),
                    });
                }
                Ok(CatalogItem {
                    id: row.try_get("id")?,
                    collection,
                    start_datetime: row.try_get::<Option<DateTime<Utc>>, _>("datetime")?,
                    end_datetime: row.try_get::<Option<DateTime<Utc>>, _>("end_datetime")?,
                    geometry: row.try_get("geometry")?,
                    content: row.try_get::<Option<String>, _>("content")?.unwrap_or_default(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn names_are_schema_qualified() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let catalog = PgstacCatalog::new(pool, "pgstac");
        assert_eq!(catalog.name(), "pgstac:pgstac");
        assert_eq!(catalog.qualified(&partition_name(7)), "pgstac._items_7");
    }

    async fn execute_all(pool: &PgPool, statements: &[String]) -> Result<(), sqlx::Error> {
        for statement in statements {
            sqlx::query(statement).execute(pool).await?;
        }
        Ok(())
    }

    /// Runs against a real database only when `PGSTAC_DATABASE_URL` is set
    /// and PostGIS can be enabled there.
    #[tokio::test]
    async fn reads_registry_and_partitions_from_postgres() {
        let Ok(url) = std::env::var("PGSTAC_DATABASE_URL") else {
            eprintln!("PGSTAC_DATABASE_URL not set, skipping");
            return;
        };
        let pool = PgPoolOptions::new().max_connections(2).connect(&url).await.unwrap();
        if let Err(e) = sqlx::query("CREATE EXTENSION IF NOT EXISTS postgis").execute(&pool).await {
            eprintln!("postgis unavailable ({}), skipping", e);
            return;
        }

        let schema = format!("flatstac_test_{}", Uuid::new_v4().simple());
        let setup = [
            format!("CREATE SCHEMA {schema}"),
            format!("CREATE TABLE {schema}.collections (key bigint, id text)"),
            format!("INSERT INTO {schema}.collections VALUES (1, 'gages'), (1, 'gages'), (2, 'models')"),
            format!(
                "CREATE TABLE {schema}._items_1 (id text, collection text, datetime timestamptz, \
                 end_datetime timestamptz, geometry geometry, content jsonb)"
            ),
            format!(
                "INSERT INTO {schema}._items_1 VALUES \
                 ('08061540', 'gages', '1995-01-01T00:00:00Z', NULL, NULL, '{{\"id\":\"08061540\"}}'), \
                 ('08057415', 'gages', '1990-01-01T00:00:00Z', '2020-12-31T00:00:00Z', \
                  ST_SetSRID(ST_MakePoint(-96.9, 32.9), 4326), '{{\"id\":\"08057415\"}}')"
            ),
            format!("CREATE TABLE {schema}._items_9 (id text)"),
            format!("CREATE TABLE {schema}._items_x (id text)"),
        ];
        let (test_pool, test_schema) = (pool.clone(), schema.clone());
        let result = async move {
            let (pool, schema) = (test_pool, test_schema);
            execute_all(&pool, &setup).await.unwrap();
            let catalog = PgstacCatalog::new(pool.clone(), &schema);

            let collections = catalog.list_collections().await.unwrap();
            assert_eq!(
                collections,
                vec![
                    CollectionEntry { key: 1, id: "gages".to_string() },
                    CollectionEntry { key: 2, id: "models".to_string() },
                ]
            );

            assert!(catalog.resolve_partition(&collections[1]).await.unwrap().is_none());
            let gages = catalog.resolve_partition(&collections[0]).await.unwrap().unwrap();
            assert_eq!(gages.name, "_items_1");

            // `_items_x` does not match the partition pattern.
            assert_eq!(
                catalog.list_partitions().await.unwrap(),
                vec!["_items_1".to_string(), "_items_9".to_string()]
            );

            let items = catalog.read_partition(&gages).await.unwrap();
            assert_eq!(items.len(), 2);
            assert_eq!(items[0].id, "08057415");
            assert!(items[0].geometry.as_deref().unwrap().contains("Point"));
            assert!(items[0].end_datetime.is_some());
            assert_eq!(items[1].geometry, None);
            let content: serde_json::Value = serde_json::from_str(&items[1].content).unwrap();
            assert_eq!(content["id"], "08061540");

            sqlx::query(&format!("DROP TABLE {schema}._items_1"))
                .execute(&pool)
                .await
                .unwrap();
            let err = catalog.read_partition(&gages).await.unwrap_err();
            assert!(matches!(err, FlattenError::SchemaDrift { key: 1, .. }));
        };
        // Drop the schema even when an assertion failed.
        let outcome = tokio::spawn(result).await;
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {schema} CASCADE"))
            .execute(&pool)
            .await
            .unwrap();
        if let Err(e) = outcome {
            std::panic::resume_unwind(e.into_panic());
        }
    }
}
