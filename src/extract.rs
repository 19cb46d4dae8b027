//! Domain extractors.
//!
//! Pure transformations over the flat item set. Every item document is
//! decoded through a typed serde layer; fields that do not decode are
//! recorded as [`DecodeIssue`]s and skipped instead of silently becoming
//! null.
//!
//! | Extractor | Input | Output |
//! |-----------|-------|--------|
//! | [`gage_summaries`] | items of the gage collection | [`GageSummary`] |
//! | [`asset_references`] | assets passing [`AssetFilter`] | [`AssetReference`] |
//! | [`model_gage_links`] | `ref_line` references | [`ModelGageLink`] |
//! | [`levee_dam_elements`] | `ref_point` + `connection` references | [`LeveeDamElement`] |
//! | [`storm_summaries`] | items of the storm collection | [`StormSummary`] |

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::{Config, MalformedPolicy};
use crate::error::{FlattenError, FlattenResult};
use crate::join;
use crate::models::{
    AssetReference, CatalogItem, DecodeIssue, Derived, ElementType, ExtractReport, GageSummary,
    LeveeDamElement, ModelGageLink, ReferenceKind, StormSummary,
};

const REF_LINES_KEY: &str = "HEC-RAS:ref_lines";
const REF_POINTS_KEY: &str = "HEC-RAS:ref_points";
const CONNECTIONS_KEY: &str = "HEC-RAS:connections";

const STATION_NAME_KEY: &str = "station_nm";
const STORM_TYPE_KEY: &str = "FFRD:storm_type";
const TROPICAL_STORM_KEY: &str = "FFRD:tropical_storm";
const PRECIP_STATS_KEY: &str = "aorc:statistics";

/// Asset key naming convention for HEC-RAS geometry files.
///
/// A key is kept when it matches an include pattern and no exclude pattern.
/// With the defaults `Plan.g01` is kept while `Terrain.g01.hdf` and
/// `Plan.g01.hdf_thumbnail` are not.
#[derive(Debug, Clone)]
pub struct AssetFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl AssetFilter {
    pub fn new(include: &[String], exclude: &[String]) -> FlattenResult<Self> {
        Ok(Self {
            include: build_globset(include)?,
            exclude: build_globset(exclude)?,
        })
    }

    pub fn matches(&self, asset_key: &str) -> bool {
        self.include.is_match(asset_key) && !self.exclude.is_match(asset_key)
    }
}

fn build_globset(patterns: &[String]) -> FlattenResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// How gage identifiers are read out of reference line names.
#[derive(Debug, Clone)]
pub struct GageRefRules {
    pub prefix: String,
    /// 1-based token position.
    pub token: usize,
    pub policy: MalformedPolicy,
}

/// Everything the extractors need, compiled once per refresh.
#[derive(Debug, Clone)]
pub struct ExtractRules {
    pub filter: AssetFilter,
    pub gage_rules: GageRefRules,
    pub gage_collection: String,
    pub storm_collection: String,
}

impl ExtractRules {
    pub fn from_config(config: &Config) -> FlattenResult<Self> {
        Ok(Self {
            filter: AssetFilter::new(
                &config.extract.include_asset_globs,
                &config.extract.exclude_asset_globs,
            )?,
            gage_rules: GageRefRules {
                prefix: config.extract.gage_ref_prefix.clone(),
                token: config.extract.gage_id_token,
                policy: config.extract.malformed_gage_id,
            },
            gage_collection: config.collections.gages.clone(),
            storm_collection: config.collections.storms.clone(),
        })
    }
}

/// How many decode issues a report keeps verbatim; the rest are only counted.
pub const MAX_REPORTED_DECODE_ISSUES: usize = 100;

// ─── typed document layer ──────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct ItemDocument {
    #[serde(default)]
    properties: Map<String, Value>,
    #[serde(default)]
    assets: BTreeMap<String, Map<String, Value>>,
}

fn decode_document(item: &CatalogItem, issues: &mut Vec<DecodeIssue>) -> Option<ItemDocument> {
    match serde_json::from_str::<ItemDocument>(&item.content) {
        Ok(doc) => Some(doc),
        Err(e) => {
            issues.push(issue(item, "content", e.to_string()));
            None
        }
    }
}

fn issue(item: &CatalogItem, field: &str, reason: impl Into<String>) -> DecodeIssue {
    DecodeIssue {
        item_id: item.id.clone(),
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn optional_string(
    item: &CatalogItem,
    props: &Map<String, Value>,
    key: &str,
    issues: &mut Vec<DecodeIssue>,
) -> Option<String> {
    match props.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            issues.push(issue(
                item,
                &format!("properties.{}", key),
                format!("expected string, found {}", other),
            ));
            None
        }
    }
}

fn optional_datetime(
    item: &CatalogItem,
    props: &Map<String, Value>,
    key: &str,
    issues: &mut Vec<DecodeIssue>,
) -> Option<DateTime<Utc>> {
    let raw = optional_string(item, props, key, issues)?;
    match DateTime::parse_from_rfc3339(&raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            issues.push(issue(
                item,
                &format!("properties.{}", key),
                format!("'{}' is not RFC 3339: {}", raw, e),
            ));
            None
        }
    }
}

fn optional_number(
    item: &CatalogItem,
    obj: &Map<String, Value>,
    path: &str,
    key: &str,
    issues: &mut Vec<DecodeIssue>,
) -> Option<f64> {
    match obj.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => n.as_f64(),
        Some(other) => {
            issues.push(issue(
                item,
                &format!("{}.{}", path, key),
                format!("expected number, found {}", other),
            ));
            None
        }
    }
}

// ─── extractors ────────────────────────────────────────────────────────

pub fn gage_summaries(
    items: &[CatalogItem],
    gage_collection: &str,
    issues: &mut Vec<DecodeIssue>,
) -> Vec<GageSummary> {
    items
        .iter()
        .filter(|item| item.collection == gage_collection)
        .filter_map(|item| {
            let doc = decode_document(item, issues)?;
            let props = &doc.properties;
            Some(GageSummary {
                gage_id: item.id.clone(),
                station_name: optional_string(item, props, STATION_NAME_KEY, issues),
                start_datetime: optional_datetime(item, props, "start_datetime", issues)
                    .or(item.start_datetime),
                end_datetime: optional_datetime(item, props, "end_datetime", issues)
                    .or(item.end_datetime),
                geometry: item.geometry.clone(),
            })
        })
        .collect()
}

/// Expand the reference arrays of every asset whose key passes `filter`.
pub fn asset_references(
    items: &[CatalogItem],
    filter: &AssetFilter,
    issues: &mut Vec<DecodeIssue>,
) -> Vec<AssetReference> {
    let mut refs = Vec::new();
    for item in items {
        let Some(doc) = decode_document(item, issues) else {
            continue;
        };
        for (asset_key, asset) in &doc.assets {
            if !filter.matches(asset_key) {
                continue;
            }
            for (json_key, kind) in [
                (REF_LINES_KEY, ReferenceKind::RefLine),
                (REF_POINTS_KEY, ReferenceKind::RefPoint),
                (CONNECTIONS_KEY, ReferenceKind::Connection),
            ] {
                let field = format!("assets.{}.{}", asset_key, json_key);
                match asset.get(json_key) {
                    None | Some(Value::Null) => {}
                    Some(Value::Array(elements)) => {
                        for element in elements {
                            match reference_name(element) {
                                Some(name) => refs.push(AssetReference {
                                    model_id: item.id.clone(),
                                    collection: item.collection.clone(),
                                    asset_key: asset_key.clone(),
                                    kind,
                                    element: name,
                                }),
                                None => issues.push(issue(
                                    item,
                                    &field,
                                    format!("unusable reference element {}", element),
                                )),
                            }
                        }
                    }
                    Some(other) => {
                        issues.push(issue(item, &field, format!("expected array, found {}", other)))
                    }
                }
            }
        }
    }
    refs
}

fn reference_name(element: &Value) -> Option<String> {
    match element {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(obj) => match obj.get("name") {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// The `token`-th (1-based) `_`-delimited token of `ref_line`.
///
/// Returns `None` when the name has fewer tokens or the token is empty:
/// `gage_usgs_08057415_extra` yields `08057415`, `gage_usgs` yields `None`.
pub fn parse_gage_id(ref_line: &str, token: usize) -> Option<String> {
    if token == 0 {
        return None;
    }
    ref_line
        .split('_')
        .nth(token - 1)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

pub fn model_gage_links(
    refs: &[AssetReference],
    rules: &GageRefRules,
    report: &mut ExtractReport,
) -> FlattenResult<Vec<ModelGageLink>> {
    let mut links = Vec::new();
    for r in refs
        .iter()
        .filter(|r| r.kind == ReferenceKind::RefLine && r.element.starts_with(&rules.prefix))
    {
        let gage_id = parse_gage_id(&r.element, rules.token);
        if gage_id.is_none() {
            report.malformed_gage_ids += 1;
            match rules.policy {
                MalformedPolicy::Drop => continue,
                MalformedPolicy::KeepNull => {}
                MalformedPolicy::Fail => {
                    return Err(FlattenError::MalformedReference {
                        model_id: r.model_id.clone(),
                        asset_key: r.asset_key.clone(),
                        ref_line: r.element.clone(),
                    })
                }
            }
        }
        links.push(ModelGageLink {
            model_id: r.model_id.clone(),
            collection: r.collection.clone(),
            asset_key: r.asset_key.clone(),
            ref_line: r.element.clone(),
            gage_id,
        });
    }
    Ok(links)
}

/// Classify a reference element name: `nld…` is a levee, `nid…` a dam.
pub fn classify_element(name: &str) -> Option<ElementType> {
    let prefix = name.get(..3)?.to_ascii_lowercase();
    match prefix.as_str() {
        "nld" => Some(ElementType::Levee),
        "nid" => Some(ElementType::Dam),
        _ => None,
    }
}

pub fn levee_dam_elements(refs: &[AssetReference], report: &mut ExtractReport) -> Vec<LeveeDamElement> {
    refs.iter()
        .filter(|r| matches!(r.kind, ReferenceKind::RefPoint | ReferenceKind::Connection))
        .filter_map(|r| match classify_element(&r.element) {
            Some(element_type) => Some(LeveeDamElement {
                model_id: r.model_id.clone(),
                collection: r.collection.clone(),
                asset_key: r.asset_key.clone(),
                element: r.element.clone(),
                source: r.kind,
                element_type,
            }),
            None => {
                report.unclassified_elements += 1;
                None
            }
        })
        .collect()
}

pub fn storm_summaries(
    items: &[CatalogItem],
    storm_collection: &str,
    issues: &mut Vec<DecodeIssue>,
) -> Vec<StormSummary> {
    items
        .iter()
        .filter(|item| item.collection == storm_collection)
        .filter_map(|item| {
            let doc = decode_document(item, issues)?;
            let props = &doc.properties;

            let (precip_min, precip_mean, precip_max) = match props.get(PRECIP_STATS_KEY) {
                None | Some(Value::Null) => (None, None, None),
                Some(Value::Object(stats)) => {
                    let path = format!("properties.{}", PRECIP_STATS_KEY);
                    (
                        optional_number(item, stats, &path, "min", issues),
                        optional_number(item, stats, &path, "mean", issues),
                        optional_number(item, stats, &path, "max", issues),
                    )
                }
                Some(other) => {
                    issues.push(issue(
                        item,
                        &format!("properties.{}", PRECIP_STATS_KEY),
                        format!("expected object, found {}", other),
                    ));
                    (None, None, None)
                }
            };

            Some(StormSummary {
                storm_id: item.id.clone(),
                start_datetime: item.start_datetime,
                end_datetime: item.end_datetime,
                storm_type: optional_string(item, props, STORM_TYPE_KEY, issues),
                tropical_storm: optional_string(item, props, TROPICAL_STORM_KEY, issues),
                precip_min,
                precip_mean,
                precip_max,
                geometry: item.geometry.clone(),
            })
        })
        .collect()
}

/// Run every extractor and the join over one flat item set.
///
/// Extractors only read `items`, so gage, storm and reference extraction
/// run concurrently on the blocking pool.
pub async fn extract_all(items: Arc<Vec<CatalogItem>>, rules: &ExtractRules) -> FlattenResult<Derived> {
    let gages_task = {
        let items = Arc::clone(&items);
        let collection = rules.gage_collection.clone();
        tokio::task::spawn_blocking(move || {
            let mut issues = Vec::new();
            let rows = gage_summaries(&items, &collection, &mut issues);
            (rows, issues)
        })
    };
    let storms_task = {
        let items = Arc::clone(&items);
        let collection = rules.storm_collection.clone();
        tokio::task::spawn_blocking(move || {
            let mut issues = Vec::new();
            let rows = storm_summaries(&items, &collection, &mut issues);
            (rows, issues)
        })
    };
    let refs_task = {
        let items = Arc::clone(&items);
        let filter = rules.filter.clone();
        let gage_rules = rules.gage_rules.clone();
        tokio::task::spawn_blocking(move || -> FlattenResult<_> {
            let mut report = ExtractReport::default();
            let refs = asset_references(&items, &filter, &mut report.decode_issues);
            report.asset_references = refs.len() as u64;
            let links = model_gage_links(&refs, &gage_rules, &mut report)?;
            let elements = levee_dam_elements(&refs, &mut report);
            Ok((links, elements, report))
        })
    };

    let (gages, storms, refs) = tokio::join!(gages_task, storms_task, refs_task);
    let join_err = |e: tokio::task::JoinError| FlattenError::Source(format!("extractor task failed: {}", e));
    let (gages_summary, gage_issues) = gages.map_err(join_err)?;
    let (storms_summary, storm_issues) = storms.map_err(join_err)?;
    let (model_gage_links, levee_dam_elements, mut report) = refs.map_err(join_err)??;

    let joined = join::gages_by_model_id(&model_gage_links, &gages_summary);
    report.join_misses = joined.unmatched.len() as u64;
    report.items_scanned = items.len() as u64;
    let scanned = std::mem::take(&mut report.decode_issues);
    record_decode_issues(&mut report, scanned.into_iter().chain(gage_issues).chain(storm_issues));

    if report.malformed_gage_ids > 0 {
        warn!(count = report.malformed_gage_ids, "gage reference lines with too few tokens");
    }
    if report.join_misses > 0 {
        warn!(count = report.join_misses, "model-gage links without a gage summary");
    }
    if report.decode_issue_count > 0 {
        warn!(count = report.decode_issue_count, "item fields failed to decode");
    }
    info!(
        gages = gages_summary.len(),
        links = model_gage_links.len(),
        joined = joined.rows.len(),
        levee_dam = levee_dam_elements.len(),
        storms = storms_summary.len(),
        "derived domain results"
    );

    Ok(Derived {
        gages_summary,
        model_gage_links,
        gages_by_model_id: joined.rows,
        levee_dam_elements,
        storms_summary,
        report,
    })
}

/// Count decode issues once per `(item_id, field)` and keep the first
/// [`MAX_REPORTED_DECODE_ISSUES`] of them.
///
/// A bad document is seen by more than one extractor; only the first
/// report of it is kept.
fn record_decode_issues(report: &mut ExtractReport, issues: impl IntoIterator<Item = DecodeIssue>) {
    let mut seen = HashSet::new();
    let mut count = 0u64;
    let mut kept = Vec::new();
    for issue in issues {
        if !seen.insert((issue.item_id.clone(), issue.field.clone())) {
            continue;
        }
        count += 1;
        if kept.len() < MAX_REPORTED_DECODE_ISSUES {
            kept.push(issue);
        }
    }
    report.decode_issue_count = count;
    report.decode_issues = kept;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{gage_item, model_item, storm_item};
    use serde_json::json;

    fn default_filter() -> AssetFilter {
        AssetFilter::new(
            &["*.g*".to_string()],
            &["*.hdf".to_string(), "*.hdf_thumbnail".to_string()],
        )
        .unwrap()
    }

    fn rules(policy: MalformedPolicy) -> GageRefRules {
        GageRefRules {
            prefix: "gage".to_string(),
            token: 3,
            policy,
        }
    }

    fn ref_line(element: &str) -> AssetReference {
        AssetReference {
            model_id: "blw-elkhart".to_string(),
            collection: "models".to_string(),
            asset_key: "Plan.g01".to_string(),
            kind: ReferenceKind::RefLine,
            element: element.to_string(),
        }
    }

    #[test]
    fn asset_filter_follows_geometry_file_convention() {
        let filter = default_filter();
        assert!(filter.matches("Plan.g01"));
        assert!(!filter.matches("Terrain.g01.hdf"));
        assert!(!filter.matches("Plan.g01.hdf_thumbnail"));
        assert!(!filter.matches("Plan.p01"));
    }

    #[test]
    fn gage_id_is_third_token() {
        assert_eq!(
            parse_gage_id("gage_usgs_08057415_extra", 3).as_deref(),
            Some("08057415")
        );
        assert_eq!(parse_gage_id("gage_usgs", 3), None);
        assert_eq!(parse_gage_id("gage_usgs_", 3), None);
        assert_eq!(parse_gage_id("gage_usgs_x", 0), None);
    }

    #[test]
    fn short_gage_reference_is_dropped_by_default() {
        let refs = vec![ref_line("gage_usgs_08057415_extra"), ref_line("gage_usgs")];
        let mut report = ExtractReport::default();
        let links = model_gage_links(&refs, &rules(MalformedPolicy::Drop), &mut report).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].gage_id.as_deref(), Some("08057415"));
        assert_eq!(report.malformed_gage_ids, 1);
    }

    #[test]
    fn short_gage_reference_kept_as_null() {
        let refs = vec![ref_line("gage_usgs")];
        let mut report = ExtractReport::default();
        let links =
            model_gage_links(&refs, &rules(MalformedPolicy::KeepNull), &mut report).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].gage_id, None);
        assert_eq!(report.malformed_gage_ids, 1);
    }

    #[test]
    fn short_gage_reference_fails_when_asked() {
        let refs = vec![ref_line("gage_usgs")];
        let mut report = ExtractReport::default();
        let err = model_gage_links(&refs, &rules(MalformedPolicy::Fail), &mut report).unwrap_err();
        assert!(matches!(err, FlattenError::MalformedReference { ref ref_line, .. } if ref_line == "gage_usgs"));
    }

    #[test]
    fn non_gage_reference_lines_are_ignored() {
        let refs = vec![ref_line("xs_upstream_1"), ref_line("Gage_usgs_1")];
        let mut report = ExtractReport::default();
        let links = model_gage_links(&refs, &rules(MalformedPolicy::Drop), &mut report).unwrap();
        assert!(links.is_empty());
        assert_eq!(report.malformed_gage_ids, 0);
    }

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(classify_element("NLD_12345"), Some(ElementType::Levee));
        assert_eq!(classify_element("nid_998"), Some(ElementType::Dam));
        assert_eq!(classify_element("other_123"), None);
        assert_eq!(classify_element("ni"), None);
    }

    #[test]
    fn unclassified_elements_are_excluded() {
        let item = model_item(
            "blw-elkhart",
            &[(
                "Plan.g01",
                json!({
                    "HEC-RAS:ref_points": ["NLD_12345", "other_123"],
                    "HEC-RAS:connections": ["nid_998"]
                }),
            )],
        );
        let mut report = ExtractReport::default();
        let refs = asset_references(&[item], &default_filter(), &mut report.decode_issues);
        let elements = levee_dam_elements(&refs, &mut report);

        assert_eq!(elements.len(), 2);
        assert!(elements.iter().all(|e| e.element != "other_123"));
        let levee = elements.iter().find(|e| e.element == "NLD_12345").unwrap();
        assert_eq!(levee.element_type, ElementType::Levee);
        assert_eq!(levee.source, ReferenceKind::RefPoint);
        let dam = elements.iter().find(|e| e.element == "nid_998").unwrap();
        assert_eq!(dam.element_type, ElementType::Dam);
        assert_eq!(dam.source, ReferenceKind::Connection);
        assert_eq!(report.unclassified_elements, 1);
    }

    #[test]
    fn references_outside_geometry_assets_are_skipped() {
        let item = model_item(
            "blw-elkhart",
            &[
                ("Plan.g01", json!({"HEC-RAS:ref_lines": ["gage_usgs_08057415"]})),
                ("Terrain.g01.hdf", json!({"HEC-RAS:ref_lines": ["gage_usgs_1"]})),
                ("Plan.g01.hdf_thumbnail", json!({"HEC-RAS:ref_lines": ["gage_usgs_2"]})),
            ],
        );
        let mut issues = Vec::new();
        let refs = asset_references(&[item], &default_filter(), &mut issues);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].asset_key, "Plan.g01");
        assert_eq!(refs[0].element, "gage_usgs_08057415");
        assert!(issues.is_empty());
    }

    #[test]
    fn object_references_use_their_name() {
        let item = model_item(
            "blw-elkhart",
            &[(
                "Plan.g02",
                json!({"HEC-RAS:ref_lines": [{"name": "gage_usgs_08062800"}, 42]}),
            )],
        );
        let mut issues = Vec::new();
        let refs = asset_references(&[item], &default_filter(), &mut issues);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].element, "gage_usgs_08062800");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "assets.Plan.g02.HEC-RAS:ref_lines");
    }

    #[test]
    fn invalid_content_is_reported() {
        let mut item = gage_item("08062800", "Trinity Rv at Dallas");
        item.content = "{not json".to_string();
        let mut issues = Vec::new();
        let gages = gage_summaries(&[item], "gages", &mut issues);
        assert!(gages.is_empty());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "content");
    }

    #[test]
    fn gage_summary_projects_station_and_extent() {
        let items = vec![
            gage_item("08062800", "Trinity Rv at Dallas"),
            model_item("blw-elkhart", &[]),
        ];
        let mut issues = Vec::new();
        let gages = gage_summaries(&items, "gages", &mut issues);
        assert_eq!(gages.len(), 1);
        assert_eq!(gages[0].gage_id, "08062800");
        assert_eq!(gages[0].station_name.as_deref(), Some("Trinity Rv at Dallas"));
        assert_eq!(
            gages[0].start_datetime.unwrap().to_rfc3339(),
            "1990-01-01T00:00:00+00:00"
        );
        assert!(gages[0].geometry.is_some());
        assert!(issues.is_empty());
    }

    #[test]
    fn storm_summary_reads_statistics() {
        let items = vec![
            storm_item(
                "1",
                json!({
                    "FFRD:storm_type": "tropical",
                    "FFRD:tropical_storm": "Allison",
                    "aorc:statistics": {"min": 0.0, "mean": 3.25, "max": 14.5}
                }),
            ),
            storm_item(
                "2",
                json!({
                    "FFRD:storm_type": "frontal",
                    "aorc:statistics": {"min": 0.1, "mean": "high", "max": 6}
                }),
            ),
        ];
        let mut issues = Vec::new();
        let storms = storm_summaries(&items, "72hr-events", &mut issues);

        assert_eq!(storms.len(), 2);
        assert_eq!(storms[0].tropical_storm.as_deref(), Some("Allison"));
        assert_eq!(storms[0].precip_max, Some(14.5));
        assert_eq!(storms[1].tropical_storm, None);
        assert_eq!(storms[1].precip_mean, None);
        assert_eq!(storms[1].precip_max, Some(6.0));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "properties.aorc:statistics.mean");
    }

    #[tokio::test]
    async fn extract_all_is_deterministic() {
        let items = Arc::new(vec![
            gage_item("08057415", "Elm Fk Trinity Rv"),
            model_item(
                "blw-elkhart",
                &[(
                    "Plan.g01",
                    json!({
                        "HEC-RAS:ref_lines": ["gage_usgs_08057415", "gage_usgs_99999999", "gage_x"],
                        "HEC-RAS:ref_points": ["nld_1"]
                    }),
                )],
            ),
        ]);
        let rules = ExtractRules {
            filter: default_filter(),
            gage_rules: rules(MalformedPolicy::Drop),
            gage_collection: "gages".to_string(),
            storm_collection: "72hr-events".to_string(),
        };

        let first = extract_all(Arc::clone(&items), &rules).await.unwrap();
        let second = extract_all(items, &rules).await.unwrap();
        assert_eq!(first, second);

        assert_eq!(first.model_gage_links.len(), 2);
        assert_eq!(first.gages_by_model_id.len(), 1);
        assert_eq!(first.report.join_misses, 1);
        assert_eq!(first.report.malformed_gage_ids, 1);
        assert_eq!(first.report.asset_references, 4);
        assert_eq!(first.levee_dam_elements.len(), 1);
        assert_eq!(first.report.items_scanned, 2);
    }

    fn broken_gage(id: &str) -> CatalogItem {
        let mut item = gage_item(id, "unused");
        item.content = "{not json".to_string();
        item
    }

    fn gage_only_rules() -> ExtractRules {
        ExtractRules {
            filter: default_filter(),
            gage_rules: rules(MalformedPolicy::Drop),
            gage_collection: "gages".to_string(),
            storm_collection: "72hr-events".to_string(),
        }
    }

    #[tokio::test]
    async fn bad_document_is_reported_once() {
        let items = Arc::new(vec![broken_gage("08062800"), gage_item("08057415", "Elm Fk")]);
        let derived = extract_all(items, &gage_only_rules()).await.unwrap();

        assert_eq!(derived.gages_summary.len(), 1);
        assert_eq!(derived.report.decode_issue_count, 1);
        assert_eq!(derived.report.decode_issues.len(), 1);
        assert_eq!(derived.report.decode_issues[0].item_id, "08062800");
        assert_eq!(derived.report.decode_issues[0].field, "content");
    }

    #[tokio::test]
    async fn decode_issue_list_is_capped() {
        let items: Vec<_> = (0..150).map(|i| broken_gage(&format!("g{:03}", i))).collect();
        let derived = extract_all(Arc::new(items), &gage_only_rules()).await.unwrap();

        assert_eq!(derived.report.decode_issue_count, 150);
        assert_eq!(derived.report.decode_issues.len(), MAX_REPORTED_DECODE_ISSUES);
        assert_eq!(derived.report.decode_issues[0].item_id, "g000");
    }
}
