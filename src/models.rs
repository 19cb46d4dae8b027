//! Core data models used throughout flat-stac.
//!
//! These types represent the catalog items read from the source, the typed
//! rows derived from them, and the bookkeeping that describes a published
//! refresh.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of the source collection registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionEntry {
    /// Numeric key; the physical partition name is derived from it.
    pub key: i64,
    /// Collection identifier (e.g. `gages`).
    pub id: String,
}

/// A physical partition resolved and validated for a registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub collection: CollectionEntry,
    pub name: String,
}

/// Partition name for a collection key.
pub fn partition_name(key: i64) -> String {
    format!("_items_{}", key)
}

/// A catalog item as stored by the source, and as copied into the flat
/// item table.
///
/// `content` is the raw JSON document text. It is never re-serialized so
/// the flat table matches the source byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub collection: String,
    pub start_datetime: Option<DateTime<Utc>>,
    pub end_datetime: Option<DateTime<Utc>>,
    /// GeoJSON geometry text.
    pub geometry: Option<String>,
    pub content: String,
}

/// Which embedded array an [`AssetReference`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    RefLine,
    RefPoint,
    Connection,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::RefLine => "ref_line",
            ReferenceKind::RefPoint => "ref_point",
            ReferenceKind::Connection => "connection",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ref_line" => Some(ReferenceKind::RefLine),
            "ref_point" => Some(ReferenceKind::RefPoint),
            "connection" => Some(ReferenceKind::Connection),
            _ => None,
        }
    }
}

/// One referenced line/point/connection of one asset of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetReference {
    pub model_id: String,
    pub collection: String,
    pub asset_key: String,
    pub kind: ReferenceKind,
    pub element: String,
}

/// One row per item of the gage collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GageSummary {
    pub gage_id: String,
    pub station_name: Option<String>,
    pub start_datetime: Option<DateTime<Utc>>,
    pub end_datetime: Option<DateTime<Utc>>,
    pub geometry: Option<String>,
}

/// A model asset referencing a gage through a reference line.
///
/// `gage_id` is `None` only under the `keep_null` malformed policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelGageLink {
    pub model_id: String,
    pub collection: String,
    pub asset_key: String,
    pub ref_line: String,
    pub gage_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Levee,
    Dam,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::Levee => "levee",
            ElementType::Dam => "dam",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "levee" => Some(ElementType::Levee),
            "dam" => Some(ElementType::Dam),
            _ => None,
        }
    }
}

/// A reference point or connection classified as a levee or dam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeveeDamElement {
    pub model_id: String,
    pub collection: String,
    pub asset_key: String,
    pub element: String,
    pub source: ReferenceKind,
    pub element_type: ElementType,
}

/// One row per item of the storm event collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StormSummary {
    pub storm_id: String,
    pub start_datetime: Option<DateTime<Utc>>,
    pub end_datetime: Option<DateTime<Utc>>,
    pub storm_type: Option<String>,
    pub tropical_storm: Option<String>,
    pub precip_min: Option<f64>,
    pub precip_mean: Option<f64>,
    pub precip_max: Option<f64>,
    pub geometry: Option<String>,
}

/// A model-gage link enriched with gage station metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GageByModel {
    pub model_id: String,
    pub asset_key: String,
    pub ref_line: String,
    pub gage_id: String,
    pub station_name: Option<String>,
    pub start_datetime: Option<DateTime<Utc>>,
    pub end_datetime: Option<DateTime<Utc>>,
    pub geometry: Option<String>,
}

/// A field of an item document that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeIssue {
    pub item_id: String,
    pub field: String,
    pub reason: String,
}

/// Data-quality counters gathered while deriving results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractReport {
    pub items_scanned: u64,
    pub asset_references: u64,
    pub malformed_gage_ids: u64,
    pub unclassified_elements: u64,
    pub join_misses: u64,
    /// Distinct `(item_id, field)` pairs that failed to decode.
    #[serde(default)]
    pub decode_issue_count: u64,
    /// The first of those issues, capped at
    /// [`MAX_REPORTED_DECODE_ISSUES`](crate::extract::MAX_REPORTED_DECODE_ISSUES).
    pub decode_issues: Vec<DecodeIssue>,
}

/// Every derived result of one refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Derived {
    pub gages_summary: Vec<GageSummary>,
    pub model_gage_links: Vec<ModelGageLink>,
    pub gages_by_model_id: Vec<GageByModel>,
    pub levee_dam_elements: Vec<LeveeDamElement>,
    pub storms_summary: Vec<StormSummary>,
    pub report: ExtractReport,
}

/// A complete version ready to be published: the flat items and everything
/// derived from them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub items: Vec<CatalogItem>,
    pub collection_count: u64,
    pub source_fingerprint: String,
    pub derived: Derived,
}

/// What the last successful publish recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshState {
    pub version: i64,
    pub refreshed_at: DateTime<Utc>,
    pub item_count: u64,
    pub collection_count: u64,
    pub source_fingerprint: String,
    pub report: ExtractReport,
}
