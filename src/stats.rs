//! Database statistics and health overview.
//!
//! Summarises the published version: row counts of every published table,
//! per-collection item counts, and the data-quality counters recorded by
//! the last refresh. Used by `flatstac stats` to give confidence that
//! refreshes produce what they should.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::migrate::PublishedTable;
use crate::store::sqlite::SqliteFlatStore;
use crate::store::FlatStore;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteFlatStore::open(config).await?;
    let pool = store.pool();

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("flat-stac — Database Stats");
    println!("==========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));

    let state = store.state().await?;
    match &state {
        Some(state) => {
            println!("  Version:     {}", state.version);
            println!(
                "  Refreshed:   {}",
                format_ts_relative(state.refreshed_at.timestamp())
            );
        }
        None => println!("  Refreshed:   never"),
    }

    println!();
    println!("  {:<24} {:>10}", "TABLE", "ROWS");
    println!("  {}", "-".repeat(35));
    for table in PublishedTable::ALL {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table.name()))
            .fetch_one(pool)
            .await?;
        println!("  {:<24} {:>10}", table.name(), count);
    }

    let collection_rows = sqlx::query(
        r#"
        SELECT collection, COUNT(*) AS item_count
        FROM flat_items
        GROUP BY collection
        ORDER BY item_count DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    if !collection_rows.is_empty() {
        println!();
        println!("  By collection:");
        println!("  {:<24} {:>10}", "COLLECTION", "ITEMS");
        println!("  {}", "-".repeat(35));
        for row in &collection_rows {
            let collection: String = row.get("collection");
            let count: i64 = row.get("item_count");
            println!("  {:<24} {:>10}", collection, count);
        }
    }

    if let Some(state) = &state {
        let report = &state.report;
        println!();
        println!("  Last refresh report:");
        println!("    items scanned:          {}", report.items_scanned);
        println!("    asset references:       {}", report.asset_references);
        println!("    malformed gage ids:     {}", report.malformed_gage_ids);
        println!("    unclassified elements:  {}", report.unclassified_elements);
        println!("    join misses:            {}", report.join_misses);
        println!("    decode issues:          {}", report.decode_issue_count);
        for issue in report.decode_issues.iter().take(10) {
            println!("      {} {}: {}", issue.item_id, issue.field, issue.reason);
        }
        let shown = report.decode_issues.len().min(10) as u64;
        if report.decode_issue_count > shown {
            println!("      ... {} more", report.decode_issue_count - shown);
        }
    }

    println!();

    store.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
pub(crate) fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
