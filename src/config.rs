use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub collections: CollectionsConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourceConfig {
    pub pgstac: Option<PgstacSourceConfig>,
    pub directory: Option<DirectorySourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PgstacSourceConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_pgstac_schema")]
    pub schema: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_pgstac_schema() -> String {
    "pgstac".to_string()
}
fn default_max_connections() -> u32 {
    5
}

impl PgstacSourceConfig {
    /// Connection URL, falling back to `$PGSTAC_DATABASE_URL`.
    pub fn resolved_url(&self) -> Option<String> {
        self.url
            .clone()
            .or_else(|| std::env::var("PGSTAC_DATABASE_URL").ok())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DirectorySourceConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectionsConfig {
    #[serde(default = "default_gage_collection")]
    pub gages: String,
    #[serde(default = "default_storm_collection")]
    pub storms: String,
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            gages: default_gage_collection(),
            storms: default_storm_collection(),
        }
    }
}

fn default_gage_collection() -> String {
    "gages".to_string()
}
fn default_storm_collection() -> String {
    "72hr-events".to_string()
}

/// What to do with a gage reference line that has too few tokens.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// Exclude the link and count it.
    #[default]
    Drop,
    /// Keep the link with a null gage id and count it.
    KeepNull,
    /// Abort the refresh.
    Fail,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractConfig {
    #[serde(default = "default_include_asset_globs")]
    pub include_asset_globs: Vec<String>,
    #[serde(default = "default_exclude_asset_globs")]
    pub exclude_asset_globs: Vec<String>,
    #[serde(default = "default_gage_ref_prefix")]
    pub gage_ref_prefix: String,
    /// 1-based position of the gage id among `_`-delimited tokens.
    #[serde(default = "default_gage_id_token")]
    pub gage_id_token: usize,
    #[serde(default)]
    pub malformed_gage_id: MalformedPolicy,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            include_asset_globs: default_include_asset_globs(),
            exclude_asset_globs: default_exclude_asset_globs(),
            gage_ref_prefix: default_gage_ref_prefix(),
            gage_id_token: default_gage_id_token(),
            malformed_gage_id: MalformedPolicy::default(),
        }
    }
}

fn default_include_asset_globs() -> Vec<String> {
    vec!["*.g*".to_string()]
}
fn default_exclude_asset_globs() -> Vec<String> {
    vec!["*.hdf".to_string(), "*.hdf_thumbnail".to_string()]
}
fn default_gage_ref_prefix() -> String {
    "gage".to_string()
}
fn default_gage_id_token() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct RefreshConfig {
    /// Age after which a held refresh lock is considered abandoned.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: default_lock_timeout_secs(),
        }
    }
}

fn default_lock_timeout_secs() -> u64 {
    3600
}

impl Config {
    /// Configuration with every section defaulted and no source. Used by
    /// library callers and tests that bring their own catalog.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            source: SourceConfig::default(),
            collections: CollectionsConfig::default(),
            extract: ExtractConfig::default(),
            refresh: RefreshConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    match (&config.source.pgstac, &config.source.directory) {
        (Some(_), Some(_)) => {
            anyhow::bail!("source: configure exactly one of [source.pgstac] or [source.directory]")
        }
        (None, None) => anyhow::bail!("source: one of [source.pgstac] or [source.directory] is required"),
        (Some(pg), None) => {
            if pg.resolved_url().is_none() {
                anyhow::bail!(
                    "source.pgstac.url must be set (or PGSTAC_DATABASE_URL exported)"
                );
            }
            if pg.schema.is_empty() || !pg.schema.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                anyhow::bail!("source.pgstac.schema must be a plain identifier, got '{}'", pg.schema);
            }
        }
        (None, Some(_)) => {}
    }

    if config.collections.gages.is_empty() || config.collections.storms.is_empty() {
        anyhow::bail!("collections.gages and collections.storms must not be empty");
    }

    if config.extract.gage_id_token == 0 {
        anyhow::bail!("extract.gage_id_token is 1-based and must be >= 1");
    }
    if config.extract.include_asset_globs.is_empty() {
        anyhow::bail!("extract.include_asset_globs must list at least one pattern");
    }

    if config.refresh.lock_timeout_secs == 0 {
        anyhow::bail!("refresh.lock_timeout_secs must be > 0");
    }

    Ok(())
}
