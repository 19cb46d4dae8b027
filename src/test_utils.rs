//! Item fixtures shared by unit tests.

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use crate::models::CatalogItem;

pub fn gage_item(id: &str, station: &str) -> CatalogItem {
    let content = json!({
        "id": id,
        "collection": "gages",
        "properties": {
            "station_nm": station,
            "start_datetime": "1990-01-01T00:00:00Z",
            "end_datetime": "2020-12-31T00:00:00Z"
        },
        "assets": {}
    });
    CatalogItem {
        id: id.to_string(),
        collection: "gages".to_string(),
        start_datetime: Some(Utc.with_ymd_and_hms(1990, 1, 1, 0, 0, 0).unwrap()),
        end_datetime: Some(Utc.with_ymd_and_hms(2020, 12, 31, 0, 0, 0).unwrap()),
        geometry: Some(r#"{"type":"Point","coordinates":[-96.8,32.7]}"#.to_string()),
        content: content.to_string(),
    }
}

/// A model item whose assets are given as `(key, asset json)` pairs.
pub fn model_item(id: &str, assets: &[(&str, Value)]) -> CatalogItem {
    let assets: serde_json::Map<String, Value> = assets
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    let content = json!({
        "id": id,
        "collection": "models",
        "properties": {},
        "assets": assets
    });
    CatalogItem {
        id: id.to_string(),
        collection: "models".to_string(),
        start_datetime: None,
        end_datetime: None,
        geometry: None,
        content: content.to_string(),
    }
}

pub fn storm_item(id: &str, properties: Value) -> CatalogItem {
    let content = json!({
        "id": id,
        "collection": "72hr-events",
        "properties": properties,
        "assets": {}
    });
    CatalogItem {
        id: id.to_string(),
        collection: "72hr-events".to_string(),
        start_datetime: Some(Utc.with_ymd_and_hms(1979, 2, 1, 0, 0, 0).unwrap()),
        end_datetime: Some(Utc.with_ymd_and_hms(1979, 2, 4, 0, 0, 0).unwrap()),
        geometry: None,
        content: content.to_string(),
    }
}
