#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use histree::primitives::io::{FaultyIo, FileIo, StdFileIo};
use histree::tree::{CounterMetrics, IGNORE_PROVIDER_VERSION, TREE_HEADER_SIZE};
use histree::{HistError, HistoryTree, HistoryTreeConfig, InsertPolicy, Interval, StateValue};
use tempfile::TempDir;

fn config() -> HistoryTreeConfig {
    HistoryTreeConfig::new(1_000)
        .block_size(512)
        .max_children(4)
        .provider_version(7)
}

fn value(i: i64) -> StateValue {
    match i % 4 {
        0 => StateValue::Int(i as i32),
        1 => StateValue::Str(format!("state-{i}")),
        2 => StateValue::Double(i as f64 / 4.0),
        _ => StateValue::Null,
    }
}

fn build(dir: &Path, policy: InsertPolicy) -> (PathBuf, Vec<Interval>) {
    let path = dir.join("reopen.ht");
    let tree = HistoryTree::create(&path, config().policy(policy)).expect("create");
    let mut inserted = Vec::new();
    for i in 0..400i64 {
        let start = 1_000 + i * 5;
        let interval = Interval::new(start, start + 4 + i % 3, (i % 6) as u32, value(i))
            .expect("interval");
        tree.insert(interval.clone()).expect("insert");
        inserted.push(interval);
    }
    tree.close_tree(5_000).expect("close");
    (path, inserted)
}

fn open(path: &Path, provider_version: u32) -> histree::Result<HistoryTree> {
    HistoryTree::open(path, HistoryTreeConfig::default().provider_version(provider_version))
}

#[test]
fn reopened_tree_answers_like_the_original() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("same.ht");
    let tree = HistoryTree::create(&path, config()).expect("create");
    for i in 0..250i64 {
        let start = 1_000 + i * 4;
        tree.insert(Interval::new(start, start + 3, (i % 3) as u32, value(i)).expect("interval"))
            .expect("insert");
    }
    tree.close_tree(2_100).expect("close");
    let expected_header = tree.header();
    let expected_branch = tree.latest_branch();
    let expected: Vec<_> = (1_000..2_000).step_by(37).map(|t| tree.query(t).expect("query")).collect();
    drop(tree);

    let reopened = open(&path, 7).expect("open");
    assert_eq!(reopened.header(), expected_header);
    assert_eq!(reopened.latest_branch(), expected_branch);
    assert!(reopened.is_closed());
    assert_eq!(reopened.tree_start(), 1_000);
    assert_eq!(reopened.tree_end(), 2_100);
    assert_eq!(reopened.file_size(), fs::metadata(&path).expect("metadata").len());
    let actual: Vec<_> = (1_000..2_000)
        .step_by(37)
        .map(|t| reopened.query(t).expect("query"))
        .collect();
    assert_eq!(actual, expected);

    let err = reopened
        .insert(Interval::new(2_100, 2_101, 0, StateValue::Null).expect("interval"))
        .expect_err("reopened trees are query-only");
    assert!(matches!(err, HistError::Invariant(_)));
}

#[test]
fn every_interval_survives_reopen_under_both_policies() {
    for policy in [InsertPolicy::Sequential, InsertPolicy::Overlapping] {
        let dir = TempDir::new().expect("tempdir");
        let (path, inserted) = build(dir.path(), policy);
        let tree = open(&path, IGNORE_PROVIDER_VERSION).expect("open");
        assert_eq!(tree.policy(), policy);
        for interval in &inserted {
            let hits = tree.query(interval.end()).expect("query");
            assert!(hits.contains(interval), "{policy:?}: {interval} lost");
            let found = tree
                .query_attribute(interval.start(), interval.attribute())
                .expect("query attribute")
                .expect("attribute present");
            assert_eq!(found.attribute(), interval.attribute());
        }
        let all: Vec<_> = tree
            .query_range(1_000, 5_000)
            .expect("range")
            .collect::<histree::Result<_>>()
            .expect("range items");
        assert_eq!(all.len(), inserted.len());
    }
}

#[test]
fn closed_nodes_are_served_from_the_cache_after_the_first_read() {
    let dir = TempDir::new().expect("tempdir");
    let (path, _) = build(dir.path(), InsertPolicy::Sequential);
    let metrics = Arc::new(CounterMetrics::default());
    let tree = HistoryTree::open(
        &path,
        HistoryTreeConfig::default()
            .provider_version(7)
            .metrics(metrics.clone()),
    )
    .expect("open");
    tree.query(1_002).expect("first");
    let misses = metrics.node_cache_misses.load(std::sync::atomic::Ordering::Relaxed);
    tree.query(1_002).expect("second");
    assert_eq!(
        metrics.node_cache_misses.load(std::sync::atomic::Ordering::Relaxed),
        misses
    );
    assert!(metrics.node_cache_hits.load(std::sync::atomic::Ordering::Relaxed) > 0);
    assert_eq!(metrics.queries.load(std::sync::atomic::Ordering::Relaxed), 2);
}

#[test]
fn provider_version_must_match_unless_ignored() {
    let dir = TempDir::new().expect("tempdir");
    let (path, _) = build(dir.path(), InsertPolicy::Sequential);
    let err = open(&path, 8).err().expect("version mismatch");
    assert!(matches!(
        err,
        HistError::ProviderVersion {
            expected: 8,
            found: 7
        }
    ));
    assert!(err.requires_rebuild());
    assert_eq!(
        open(&path, IGNORE_PROVIDER_VERSION).expect("open").provider_version(),
        7
    );
}

#[test]
fn unclosed_file_cannot_be_reopened() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("open.ht");
    let tree = HistoryTree::create(&path, config()).expect("create");
    tree.insert(Interval::new(1_000, 1_010, 0, StateValue::Int(1)).expect("interval"))
        .expect("insert");
    drop(tree);
    let err = open(&path, 7).err().expect("incomplete file");
    assert!(matches!(err, HistError::Format(_)));
    assert!(err.requires_rebuild());
}

#[test]
fn damaged_headers_and_truncation_are_format_errors() {
    let dir = TempDir::new().expect("tempdir");
    let (path, _) = build(dir.path(), InsertPolicy::Sequential);
    let pristine = fs::read(&path).expect("read");

    let mut bad_magic = pristine.clone();
    bad_magic[0] ^= 0xFF;
    fs::write(&path, &bad_magic).expect("write");
    assert!(matches!(open(&path, 7), Err(HistError::Format(_))));

    let mut bad_version = pristine.clone();
    bad_version[4] = 42;
    fs::write(&path, &bad_version).expect("write");
    assert!(matches!(
        open(&path, 7),
        Err(HistError::FileVersion { found: 42, .. })
    ));

    let mut bad_crc = pristine.clone();
    bad_crc[20] ^= 0x01;
    fs::write(&path, &bad_crc).expect("write");
    assert!(matches!(open(&path, 7), Err(HistError::Format(_))));

    let truncated = &pristine[..pristine.len() - 100];
    fs::write(&path, truncated).expect("write");
    assert!(matches!(open(&path, 7), Err(HistError::Format(_))));

    fs::write(&path, &pristine[..TREE_HEADER_SIZE as usize - 1]).expect("write");
    assert!(matches!(open(&path, 7), Err(HistError::Format(_))));

    fs::write(&path, &pristine).expect("write");
    open(&path, 7).expect("pristine copy opens");
}

#[test]
fn read_failures_surface_as_io_errors() {
    let dir = TempDir::new().expect("tempdir");
    let (path, _) = build(dir.path(), InsertPolicy::Sequential);
    let io = Arc::new(FaultyIo::new(StdFileIo::open_read_only(&path).expect("file")));
    let tree = HistoryTree::open_with_io(
        io.clone() as Arc<dyn FileIo>,
        HistoryTreeConfig::default()
            .provider_version(IGNORE_PROVIDER_VERSION)
            .node_cache_capacity(1),
    )
    .expect("open");
    io.fail_reads(true);
    // The first leaf is neither cached nor part of the latest branch.
    assert!(matches!(tree.query(1_001), Err(HistError::Io(_))));
    io.fail_reads(false);
    assert!(!tree.query(1_001).expect("query").is_empty());
}

#[test]
fn delete_file_removes_the_backing_file() {
    let dir = TempDir::new().expect("tempdir");
    let (path, _) = build(dir.path(), InsertPolicy::Sequential);
    let tree = open(&path, 7).expect("open");
    tree.delete_file().expect("delete");
    assert!(!path.exists());
}
