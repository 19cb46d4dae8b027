//! `flatstac show <view>`: dump a published table as JSON lines.

use std::io::Write;

use anyhow::{bail, Result};
use clap::ValueEnum;
use serde::Serialize;

use crate::config::Config;
use crate::store::sqlite::SqliteFlatStore;
use crate::store::FlatStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum View {
    Items,
    GagesSummary,
    ModelGageLinks,
    GagesByModelId,
    LeveeDamElements,
    StormsSummary,
}

impl View {
    fn is_per_model(&self) -> bool {
        matches!(
            self,
            View::ModelGageLinks | View::GagesByModelId | View::LeveeDamElements
        )
    }
}

fn write_rows<T: Serialize>(rows: &[T], limit: Option<usize>) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for row in rows.iter().take(limit.unwrap_or(usize::MAX)) {
        serde_json::to_writer(&mut out, row)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

pub async fn run_show(
    config: &Config,
    view: View,
    model_id: Option<&str>,
    limit: Option<usize>,
) -> Result<()> {
    if model_id.is_some() && !view.is_per_model() {
        bail!("--model-id only applies to model-gage-links, gages-by-model-id and levee-dam-elements");
    }

    let store = SqliteFlatStore::open(config).await?;
    match view {
        View::Items => write_rows(&store.load_items().await?, limit)?,
        View::GagesSummary => write_rows(&store.gages_summary().await?, limit)?,
        View::ModelGageLinks => write_rows(&store.model_gage_links(model_id).await?, limit)?,
        View::GagesByModelId => write_rows(&store.gages_by_model_id(model_id).await?, limit)?,
        View::LeveeDamElements => write_rows(&store.levee_dam_elements(model_id).await?, limit)?,
        View::StormsSummary => write_rows(&store.storms_summary().await?, limit)?,
    }
    store.close().await;
    Ok(())
}
