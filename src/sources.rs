use anyhow::Result;

use crate::catalog::open_source;
use crate::config::Config;
use crate::consolidate::orphan_partitions;
use crate::models::partition_name;

/// `flatstac sources`: the collection registry and whether each entry
/// resolves to a physical partition.
pub async fn list_sources(config: &Config) -> Result<()> {
    let source = open_source(config).await?;
    let collections = source.list_collections().await?;

    println!("source: {}", source.name());
    println!(
        "{:<8} {:<24} {:<16} STATUS",
        "KEY", "COLLECTION", "PARTITION"
    );

    let mut resolved = Vec::new();
    let mut missing = 0;
    for entry in &collections {
        match source.resolve_partition(entry).await? {
            Some(partition) => {
                println!(
                    "{:<8} {:<24} {:<16} OK",
                    entry.key, entry.id, partition.name
                );
                resolved.push(partition);
            }
            None => {
                missing += 1;
                println!(
                    "{:<8} {:<24} {:<16} MISSING",
                    entry.key,
                    entry.id,
                    partition_name(entry.key)
                );
            }
        }
    }

    for orphan in orphan_partitions(source.as_ref(), &resolved).await? {
        println!("{:<8} {:<24} {:<16} ORPHAN", "-", "-", orphan);
    }

    if missing > 0 {
        println!();
        println!(
            "{} collection(s) without a partition; a full refresh will fail with schema drift",
            missing
        );
    }
    Ok(())
}
