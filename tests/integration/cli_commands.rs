#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use histree::{HistoryTree, HistoryTreeConfig, Interval, StateValue};
use serde_json::Value;
use tempfile::TempDir;

const INTERVALS: i64 = 200;

fn setup_history(name: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join(format!("{name}.ht"));
    seed_history(&path).expect("seed history");
    (dir, path)
}

fn seed_history(path: &Path) -> histree::Result<()> {
    let config = HistoryTreeConfig::new(0)
        .block_size(512)
        .max_children(4)
        .provider_version(7);
    let tree = HistoryTree::create(path, config)?;
    for i in 0..INTERVALS {
        tree.insert(Interval::new(
            i * 10,
            i * 10 + 9,
            (i % 3) as u32,
            StateValue::Long(i),
        )?)?;
    }
    tree.close_tree(INTERVALS * 10)
}

fn run_json(args: &[&str], path: &Path) -> Value {
    let output = cargo_bin_cmd!("histree")
        .args(["--format", "json"])
        .args(args)
        .arg(path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("json output")
}

#[test]
fn info_reports_the_file_header() {
    let (_dir, path) = setup_history("info");
    let json = run_json(&["info"], &path);
    assert!(json["node_count"].as_u64().expect("node_count") > 1);
    assert_eq!(json["provider_version"], 7);
    assert_eq!(json["block_size"], 512);
    assert_eq!(json["tree_start"], 0);
    assert_eq!(json["tree_end"], INTERVALS * 10);
    assert_eq!(json["is_complete"], true);
}

#[test]
fn info_text_mentions_the_node_count() {
    let (_dir, path) = setup_history("info_text");
    let output = cargo_bin_cmd!("histree")
        .arg("info")
        .arg(&path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert!(!output.is_empty());
}

#[test]
fn full_verify_passes_on_a_fresh_file() {
    let (_dir, path) = setup_history("verify");
    let json = run_json(&["verify", "--level", "full"], &path);
    assert_eq!(json["success"], true);
    assert_eq!(json["level"], "full");
    assert_eq!(json["counts"]["intervals"], INTERVALS);
    assert_eq!(json["counts"]["unreachable_nodes"], 0);
    assert_eq!(json["counts"]["nodes_checked"], json["counts"]["node_count"]);
    assert!(json["findings"].as_array().expect("findings").is_empty());
}

#[test]
fn stats_count_every_interval() {
    let (_dir, path) = setup_history("stats");
    let json = run_json(&["stats"], &path);
    assert_eq!(json["nodes"]["intervals"], INTERVALS);
    // Chronological inserts never spill into branches.
    assert_eq!(json["nodes"]["branch_intervals"], 0);
    assert_eq!(
        json["filesystem"]["size_bytes"],
        json["filesystem"]["expected_size_bytes"]
    );
}

#[test]
fn query_lists_intervals_at_a_time() {
    let (_dir, path) = setup_history("query");
    let json = run_json(&["query", "--at", "455"], &path);
    assert_eq!(json["count"], 1);
    assert_eq!(json["truncated"], false);
    let interval = &json["intervals"][0];
    assert_eq!(interval["start"], 450);
    assert_eq!(interval["end"], 459);
    assert_eq!(interval["attribute"], 0);
    assert_eq!(interval["value"]["type"], "long");
    assert_eq!(interval["value"]["value"], 45);

    let json = run_json(&["query", "--at", "455", "--attribute", "1"], &path);
    assert_eq!(json["count"], 0);

    let json = run_json(&["query", "--at", "-5"], &path);
    assert_eq!(json["count"], 0);
}

#[test]
fn range_honors_the_limit() {
    let (_dir, path) = setup_history("range");
    let json = run_json(&["range", "--start", "100", "--end", "199"], &path);
    assert_eq!(json["count"], 10);
    assert_eq!(json["truncated"], false);

    let json = run_json(&["range", "--start", "0", "--end", "1999", "--limit", "5"], &path);
    assert_eq!(json["count"], 5);
    assert_eq!(json["truncated"], true);
    assert_eq!(json["intervals"].as_array().expect("intervals").len(), 5);
}

#[test]
fn dump_shows_the_first_leaf() {
    let (_dir, path) = setup_history("dump");
    let json = run_json(&["dump", "--node", "0"], &path);
    assert_eq!(json["kind"], "leaf");
    assert_eq!(json["seq"], 0);
    assert_eq!(json["level"], 0);
    assert_eq!(json["closed"], true);
    assert_eq!(json["start"], 0);
    assert!(!json["intervals"].as_array().expect("intervals").is_empty());
    assert!(json["children"].as_array().expect("children").is_empty());
}

#[test]
fn dump_rejects_unknown_nodes() {
    let (_dir, path) = setup_history("dump_oob");
    cargo_bin_cmd!("histree")
        .args(["dump", "--node", "100000"])
        .arg(&path)
        .assert()
        .code(1);
}

#[test]
fn missing_file_exits_with_an_error() {
    let dir = TempDir::new().expect("tempdir");
    cargo_bin_cmd!("histree")
        .arg("info")
        .arg(dir.path().join("absent.ht"))
        .assert()
        .code(1);
}

#[test]
fn corrupted_header_fails_verification() {
    let (_dir, path) = setup_history("corrupt");
    let mut bytes = fs::read(&path).expect("read");
    bytes[20] ^= 0x01;
    fs::write(&path, &bytes).expect("write");

    let output = cargo_bin_cmd!("histree")
        .args(["--format", "json", "verify"])
        .arg(&path)
        .assert()
        .code(2)
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("json output");
    assert_eq!(json["success"], false);
    assert!(!json["findings"].as_array().expect("findings").is_empty());
}

#[test]
fn provider_version_mismatch_is_refused() {
    let (_dir, path) = setup_history("provider");
    cargo_bin_cmd!("histree")
        .args(["--provider-version", "9", "info"])
        .arg(&path)
        .assert()
        .code(1);
    cargo_bin_cmd!("histree")
        .args(["--provider-version", "7", "info"])
        .arg(&path)
        .assert()
        .success();
}
