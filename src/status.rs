//! `flatstac status`: what is published, and optionally whether it is stale.

use anyhow::Result;

use crate::catalog::open_source;
use crate::config::Config;
use crate::refresh::{check_freshness, Freshness};
use crate::stats::format_ts_relative;
use crate::store::sqlite::SqliteFlatStore;
use crate::store::FlatStore;

pub async fn run_status(config: &Config, check_source: bool) -> Result<()> {
    let store = SqliteFlatStore::open(config).await?;

    match store.state().await? {
        Some(state) => {
            println!("version: {}", state.version);
            println!(
                "refreshed_at: {} ({})",
                state.refreshed_at.to_rfc3339(),
                format_ts_relative(state.refreshed_at.timestamp())
            );
            println!("collections: {}", state.collection_count);
            println!("items: {}", state.item_count);
            println!("fingerprint: {}", state.source_fingerprint);
        }
        None => println!("version: none (never refreshed)"),
    }

    if check_source {
        let source = open_source(config).await?;
        let freshness = check_freshness(source.as_ref(), &store).await?;
        match freshness {
            Freshness::Fresh => println!("source: fresh"),
            Freshness::Stale { current, .. } => {
                println!("source: stale");
                println!("source_fingerprint: {}", current);
            }
            Freshness::NeverRefreshed => println!("source: never refreshed"),
        }
    }

    store.close().await;
    Ok(())
}
