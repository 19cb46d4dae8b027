use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn flatstac_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("flatstac");
    path
}

const GAGES: &[&str] = &[
    r#"{"id":"08057415","collection":"gages","geometry":{"type":"Point","coordinates":[-96.9,32.9]},"properties":{"station_nm":"Elm Fk Trinity Rv","start_datetime":"1990-01-01T00:00:00Z","end_datetime":"2020-12-31T00:00:00Z"},"assets":{}}"#,
    r#"{"id":"08061540","collection":"gages","geometry":{"type":"Point","coordinates":[-96.6,32.9]},"properties":{"station_nm":"Rowlett Ck","start_datetime":"1995-01-01T00:00:00Z","end_datetime":"2020-12-31T00:00:00Z"},"assets":{}}"#,
];

const MODELS: &[&str] = &[
    r#"{"id":"blw-elkhart","collection":"models","geometry":null,"properties":{},"assets":{"Plan.g01":{"HEC-RAS:ref_lines":["gage_usgs_08057415","gage_usgs_00000000","gage_usgs"],"HEC-RAS:ref_points":["NLD_12345","other_123"],"HEC-RAS:connections":["nid_998"]},"Plan.hdf":{"HEC-RAS:ref_lines":["gage_usgs_08061540"]}}}"#,
];

const STORMS: &[&str] = &[
    r#"{"id":"19790201","collection":"72hr-events","geometry":null,"properties":{"start_datetime":"1979-02-01T00:00:00Z","end_datetime":"1979-02-04T00:00:00Z","FFRD:storm_type":"frontal","aorc:statistics":{"min":0.1,"mean":1.5,"max":4.2}},"assets":{}}"#,
];

fn write_partition(dir: &Path, key: i64, lines: &[&str]) {
    fs::write(dir.join(format!("_items_{}.ndjson", key)), lines.join("\n") + "\n").unwrap();
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let dump = root.join("dump");
    fs::create_dir_all(&dump).unwrap();
    fs::write(
        dump.join("collections.json"),
        r#"[{"key":1,"id":"gages"},{"key":2,"id":"models"},{"key":3,"id":"72hr-events"}]"#,
    )
    .unwrap();
    write_partition(&dump, 1, GAGES);
    write_partition(&dump, 2, MODELS);
    write_partition(&dump, 3, STORMS);

    let config_content = format!(
        r#"[db]
path = "{}/data/flat.sqlite"

[source.directory]
root = "{}/dump"

[extract]
include_asset_globs = ["*.g*"]
exclude_asset_globs = ["*.hdf", "*.hdf_thumbnail"]
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("flatstac.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_flatstac(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = flatstac_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run flatstac binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn json_lines(stdout: &str) -> Vec<serde_json::Value> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_flatstac(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_flatstac(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_flatstac(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_sources_lists_partitions() {
    let (tmp, config_path) = setup_test_env();
    write_partition(&tmp.path().join("dump"), 42, &[]);

    let (stdout, stderr, success) = run_flatstac(&config_path, &["sources"]);
    assert!(success, "sources failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("gages"));
    assert!(stdout.contains("_items_3"));
    assert!(stdout.contains("ORPHAN"));
}

#[test]
fn test_refresh_publishes_all_views() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_flatstac(&config_path, &["refresh", "--progress", "off"]);
    assert!(success, "refresh failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("collections: 3"));
    assert!(stdout.contains("items: 4"));
    assert!(stdout.contains("malformed gage ids: 1"));
    assert!(stdout.contains("join misses: 1"));
    assert!(stdout.contains("version: 1"));
    assert!(stdout.contains("ok"));

    let (stdout, _, success) = run_flatstac(&config_path, &["show", "items"]);
    assert!(success);
    let items = json_lines(&stdout);
    assert_eq!(items.len(), 4);
    // Raw document text is copied verbatim.
    assert_eq!(items[0]["content"].as_str().unwrap(), GAGES[0]);

    let (stdout, _, success) = run_flatstac(
        &config_path,
        &["show", "gages-by-model-id", "--model-id", "blw-elkhart"],
    );
    assert!(success);
    let rows = json_lines(&stdout);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["gage_id"], "08057415");
    assert_eq!(rows[0]["station_name"], "Elm Fk Trinity Rv");

    let (stdout, _, success) = run_flatstac(&config_path, &["show", "levee-dam-elements"]);
    assert!(success);
    let rows = json_lines(&stdout);
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().any(|r| r["element"] == "NLD_12345" && r["element_type"] == "levee"));
    assert!(rows.iter().any(|r| r["element"] == "nid_998" && r["element_type"] == "dam"));

    let (stdout, _, success) = run_flatstac(&config_path, &["show", "storms-summary"]);
    assert!(success);
    let rows = json_lines(&stdout);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["precip_max"], 4.2);
}

#[test]
fn test_refresh_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    run_flatstac(&config_path, &["refresh", "--progress", "off"]);
    let (first, _, _) = run_flatstac(&config_path, &["show", "items"]);
    let (stdout, _, success) = run_flatstac(&config_path, &["refresh", "--progress", "off"]);
    assert!(success);
    assert!(stdout.contains("version: 2"));
    let (second, _, _) = run_flatstac(&config_path, &["show", "items"]);
    assert_eq!(first, second);
}

#[test]
fn test_dry_run_publishes_nothing() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) =
        run_flatstac(&config_path, &["refresh", "--dry-run", "--progress", "off"]);
    assert!(success, "dry run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("(dry-run)"));

    let (stdout, _, success) = run_flatstac(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("never refreshed"));
}

#[test]
fn test_schema_drift_keeps_published_version() {
    let (tmp, config_path) = setup_test_env();
    run_flatstac(&config_path, &["refresh", "--progress", "off"]);

    fs::remove_file(tmp.path().join("dump").join("_items_3.ndjson")).unwrap();
    let (stdout, stderr, success) = run_flatstac(&config_path, &["refresh", "--progress", "off"]);
    assert!(!success, "refresh should fail: stdout={}", stdout);
    assert!(stderr.contains("schema drift"), "stderr={}", stderr);

    let (stdout, _, _) = run_flatstac(&config_path, &["status"]);
    assert!(stdout.contains("version: 1"));
    let (stdout, _, _) = run_flatstac(&config_path, &["show", "storms-summary"]);
    assert_eq!(json_lines(&stdout).len(), 1);
}

#[test]
fn test_status_detects_stale_source() {
    let (tmp, config_path) = setup_test_env();
    run_flatstac(&config_path, &["refresh", "--progress", "off"]);

    let (stdout, _, success) = run_flatstac(&config_path, &["status", "--check-source"]);
    assert!(success);
    assert!(stdout.contains("source: fresh"));

    let mut gages = GAGES.to_vec();
    gages.push(
        r#"{"id":"08062000","collection":"gages","geometry":null,"properties":{"station_nm":"Trinity Rv"},"assets":{}}"#,
    );
    write_partition(&tmp.path().join("dump"), 1, &gages);

    let (stdout, _, success) = run_flatstac(&config_path, &["status", "--check-source"]);
    assert!(success);
    assert!(stdout.contains("source: stale"));
}

#[test]
fn test_views_only_refresh() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success) = run_flatstac(&config_path, &["refresh", "--views-only", "--progress", "off"]);
    assert!(!success, "views-only before any full refresh should fail");

    run_flatstac(&config_path, &["refresh", "--progress", "off"]);
    let (stdout, stderr, success) =
        run_flatstac(&config_path, &["refresh", "--views-only", "--progress", "off"]);
    assert!(success, "views-only failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("items: 4"));
    assert!(stdout.contains("version: 2"));
}

#[test]
fn test_stats_after_refresh() {
    let (_tmp, config_path) = setup_test_env();
    run_flatstac(&config_path, &["refresh", "--progress", "off"]);

    let (stdout, stderr, success) = run_flatstac(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("flat_items"));
    assert!(stdout.contains("gages_summary"));
    assert!(stdout.contains("join misses:            1"));
}

#[test]
fn test_model_id_rejected_for_global_views() {
    let (_tmp, config_path) = setup_test_env();
    run_flatstac(&config_path, &["init"]);

    let (_, stderr, success) =
        run_flatstac(&config_path, &["show", "storms-summary", "--model-id", "x"]);
    assert!(!success);
    assert!(stderr.contains("--model-id"));
}
