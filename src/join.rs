//! Join aggregator: model-gage links enriched with gage station metadata.

use std::collections::HashMap;

use crate::models::{GageByModel, GageSummary, ModelGageLink};

/// Result of [`gages_by_model_id`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinOutput {
    /// One row per link whose gage id has a gage summary.
    pub rows: Vec<GageByModel>,
    /// Links dropped by the inner join, kept for completeness audits.
    pub unmatched: Vec<ModelGageLink>,
}

/// Inner join of `links` with `gages` on gage id.
///
/// Links without a gage id, or whose gage id has no summary, do not appear
/// in `rows`. Output order follows `links`.
pub fn gages_by_model_id(links: &[ModelGageLink], gages: &[GageSummary]) -> JoinOutput {
    let by_id: HashMap<&str, &GageSummary> = gages.iter().map(|g| (g.gage_id.as_str(), g)).collect();

    let mut out = JoinOutput::default();
    for link in links {
        let gage = link
            .gage_id
            .as_deref()
            .and_then(|id| by_id.get(id).map(|g| (id, *g)));
        match gage {
            Some((gage_id, gage)) => out.rows.push(GageByModel {
                model_id: link.model_id.clone(),
                asset_key: link.asset_key.clone(),
                ref_line: link.ref_line.clone(),
                gage_id: gage_id.to_string(),
                station_name: gage.station_name.clone(),
                start_datetime: gage.start_datetime,
                end_datetime: gage.end_datetime,
                geometry: gage.geometry.clone(),
            }),
            None => out.unmatched.push(link.clone()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(ref_line: &str, gage_id: Option<&str>) -> ModelGageLink {
        ModelGageLink {
            model_id: "blw-elkhart".to_string(),
            collection: "models".to_string(),
            asset_key: "Plan.g01".to_string(),
            ref_line: ref_line.to_string(),
            gage_id: gage_id.map(str::to_string),
        }
    }

    fn gage(id: &str, station: &str) -> GageSummary {
        GageSummary {
            gage_id: id.to_string(),
            station_name: Some(station.to_string()),
            start_datetime: None,
            end_datetime: None,
            geometry: Some(r#"{"type":"Point","coordinates":[0,0]}"#.to_string()),
        }
    }

    #[test]
    fn orphaned_gage_id_is_dropped() {
        let links = vec![
            link("gage_usgs_08057415", Some("08057415")),
            link("gage_usgs_00000000", Some("00000000")),
        ];
        let gages = vec![gage("08057415", "Elm Fk Trinity Rv")];

        let out = gages_by_model_id(&links, &gages);
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].gage_id, "08057415");
        assert_eq!(out.rows[0].station_name.as_deref(), Some("Elm Fk Trinity Rv"));
        assert_eq!(out.rows[0].ref_line, "gage_usgs_08057415");
        assert!(out.rows[0].geometry.is_some());
        assert_eq!(out.unmatched.len(), 1);
        assert_eq!(out.unmatched[0].gage_id.as_deref(), Some("00000000"));
    }

    #[test]
    fn null_gage_id_never_joins() {
        let links = vec![link("gage_usgs", None)];
        let gages = vec![gage("usgs", "should not match")];
        let out = gages_by_model_id(&links, &gages);
        assert!(out.rows.is_empty());
        assert_eq!(out.unmatched.len(), 1);
    }

    #[test]
    fn one_gage_many_models() {
        let mut other = link("gage_usgs_08057415_dup", Some("08057415"));
        other.model_id = "upper-trinity".to_string();
        let links = vec![link("gage_usgs_08057415", Some("08057415")), other];
        let out = gages_by_model_id(&links, &[gage("08057415", "Elm Fk Trinity Rv")]);
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[1].model_id, "upper-trinity");
    }
}
