//! Error handling.
//!
//! Structural failures of the flattening pipeline are reported through
//! [`FlattenError`]. Data-quality problems (short reference identifiers,
//! unclassified elements, join misses) are never errors unless the
//! configured policy says so; they are counted in
//! [`ExtractReport`](crate::models::ExtractReport) instead.

use thiserror::Error;

/// Flattening pipeline error type.
#[derive(Debug, Error)]
pub enum FlattenError {
    /// A registered collection has no physical partition in the source.
    #[error("schema drift: collection '{collection}' (key {key}) has no partition '{partition}'")]
    SchemaDrift {
        collection: String,
        key: i64,
        partition: String,
    },

    /// The same `(collection, id)` pair was read twice.
    #[error("duplicate item '{id}' in collection '{collection}'")]
    DuplicateItem { collection: String, id: String },

    /// A gage reference line did not carry enough tokens and the
    /// `fail` policy is active.
    #[error("malformed gage reference '{ref_line}' on asset '{asset_key}' of item '{model_id}'")]
    MalformedReference {
        model_id: String,
        asset_key: String,
        ref_line: String,
    },

    /// Another holder owns the refresh lock.
    #[error("refresh already in progress (held by {holder} since {acquired_at})")]
    RefreshInProgress { holder: String, acquired_at: String },

    /// A views-only refresh was requested before anything was published.
    #[error("nothing has been published yet; run a full refresh first")]
    NothingPublished,

    /// A source row could not be turned into a catalog item.
    #[error("invalid item in partition '{partition}': {reason}")]
    InvalidItem { partition: String, reason: String },

    /// An asset key glob pattern did not compile.
    #[error("invalid asset key pattern: {0}")]
    InvalidPattern(#[from] globset::Error),

    /// Error talking to the catalog source.
    #[error("catalog source error: {0}")]
    Source(String),

    /// Error from the SQL layer.
    #[error(transparent)]
    Sql(#[from] sqlx::Error),

    /// Error reading a catalog dump.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Error (de)serialising JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result alias for pipeline operations.
pub type FlattenResult<T> = Result<T, FlattenError>;
