#![allow(missing_docs)]

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use histree::admin::{verify, AdminOpenOptions, VerifyLevel};
use histree::node::NODE_HEADER_LEN;
use histree::{
    HistError, HistoryTree, HistoryTreeConfig, InsertLocation, InsertPolicy, Interval, SeqNum,
    StateValue,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;

// 21 fixed bytes + 2 length bytes + 64 payload bytes.
const IV_LEN: usize = 87;

fn iv(start: i64, end: i64) -> Interval {
    Interval::new(start, end, 1, StateValue::Bytes(vec![0xAB; 64])).expect("valid interval")
}

fn three_per_leaf(max_children: u32) -> HistoryTreeConfig {
    HistoryTreeConfig::new(0)
        .block_size((NODE_HEADER_LEN + 3 * IV_LEN) as u32)
        .max_children(max_children)
}

fn create(dir: &Path, name: &str, config: HistoryTreeConfig) -> HistoryTree {
    HistoryTree::create(dir.join(name), config).expect("create tree")
}

fn starts(hits: &[Interval]) -> Vec<i64> {
    let mut starts: Vec<i64> = hits.iter().map(Interval::start).collect();
    starts.sort_unstable();
    starts
}

#[test]
fn fourth_interval_splits_the_only_leaf() {
    let dir = TempDir::new().expect("tempdir");
    let tree = create(dir.path(), "a.ht", three_per_leaf(3));
    for t in 0..3 {
        tree.insert(iv(t, t + 1)).expect("insert");
    }
    assert_eq!((tree.node_count(), tree.depth()), (1, 1));

    tree.insert(iv(3, 4)).expect("insert");
    assert_eq!(tree.node_count(), 3);
    assert_eq!(tree.depth(), 2);
    assert_eq!(tree.latest_branch(), vec![SeqNum(1), SeqNum(2)]);

    let first_leaf = tree.read_node(SeqNum(0)).expect("leaf 0");
    assert!(first_leaf.is_closed());
    assert_eq!(first_leaf.parent(), SeqNum(1));
    assert_eq!((first_leaf.start(), first_leaf.end()), (0, 3));
}

#[test]
fn depth_grows_by_one_when_the_root_runs_out_of_children() {
    let dir = TempDir::new().expect("tempdir");
    let tree = create(dir.path(), "grow.ht", three_per_leaf(3));
    for t in 0..9 {
        tree.insert(iv(t, t + 1)).expect("insert");
    }
    // One root with three full leaves.
    assert_eq!((tree.node_count(), tree.depth()), (4, 2));
    let root = tree.read_node(tree.root_sequence()).expect("root");
    assert_eq!(root.child_count(), 3);

    tree.insert(iv(9, 10)).expect("insert");
    // New root, new branch under it, new leaf.
    assert_eq!((tree.node_count(), tree.depth()), (7, 3));
    assert_eq!(tree.latest_branch(), vec![SeqNum(4), SeqNum(5), SeqNum(6)]);

    let old_root = tree.read_node(SeqNum(1)).expect("old root");
    assert!(old_root.is_closed());
    assert_eq!(old_root.parent(), SeqNum(4));
    assert_eq!(old_root.level(), 1);
}

#[test]
fn sequence_numbers_follow_creation_order_with_two_children() {
    let dir = TempDir::new().expect("tempdir");
    let tree = create(dir.path(), "two.ht", three_per_leaf(2));
    let mut seen = Vec::new();
    for t in 0..12 {
        let loc = tree.insert(iv(t, t + 1)).expect("insert");
        seen.push(loc.seq);
    }
    // Every interval lands in a leaf and leaves are numbered increasingly.
    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
    let branch = tree.latest_branch();
    assert!(branch.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(branch.len(), tree.depth());
    assert_eq!(*branch.last().expect("leaf"), SeqNum(tree.node_count() - 1));
}

#[test]
fn out_of_order_start_goes_to_an_ancestor() {
    let dir = TempDir::new().expect("tempdir");
    let config = three_per_leaf(3).policy(InsertPolicy::Overlapping);
    let tree = create(dir.path(), "b.ht", config);

    tree.insert(iv(10, 20)).expect("insert");
    let loc = tree.insert(iv(5, 8)).expect("out of order start is accepted");
    assert_eq!(loc.level, 0);
    let hits = tree.query(6).expect("query");
    assert_eq!(hits.len(), 1);
    assert_eq!((hits[0].start(), hits[0].end()), (5, 8));

    // Fill the leaf so the next sibling starts at 30, then go back in time.
    tree.insert(iv(12, 25)).expect("insert");
    tree.insert(iv(30, 31)).expect("insert");
    assert_eq!(tree.depth(), 2);
    let leaf = tree.read_node(*tree.latest_branch().last().expect("leaf")).expect("leaf");
    assert_eq!(leaf.start(), 30);

    let loc = tree.insert(iv(15, 28)).expect("routed up");
    assert_eq!(
        loc,
        InsertLocation {
            depth: 0,
            level: 1,
            seq: tree.root_sequence(),
        }
    );
    assert_eq!(starts(&tree.query(27).expect("query")), vec![15]);
    assert_eq!(starts(&tree.query(16).expect("query")), vec![10, 12, 15]);
}

#[test]
fn overlapping_siblings_are_all_searched() {
    let dir = TempDir::new().expect("tempdir");
    let config = three_per_leaf(3).policy(InsertPolicy::Overlapping);
    let tree = create(dir.path(), "ov.ht", config);

    // Long-lived intervals keep tree_end ahead of every new sibling start.
    for (start, end) in [(0, 100), (1, 90), (2, 80), (3, 70), (4, 60), (5, 50), (6, 40)] {
        tree.insert(iv(start, end)).expect("insert");
    }
    assert!(tree.node_count() >= 3);
    let root = tree.read_node(tree.root_sequence()).expect("root");
    let covering = root.children().iter().filter(|c| c.intersects(35, 35)).count();
    assert!(covering >= 2, "expected overlapping children, got {covering}");

    assert_eq!(starts(&tree.query(35).expect("open query")), vec![0, 1, 2, 3, 4, 5, 6]);
    tree.close_tree(100).expect("close");
    assert_eq!(starts(&tree.query(35).expect("closed query")), vec![0, 1, 2, 3, 4, 5, 6]);
    assert_eq!(starts(&tree.query(95).expect("query")), vec![0]);
}

#[test]
fn close_propagates_the_end_up_the_latest_branch() {
    let dir = TempDir::new().expect("tempdir");
    let tree = create(dir.path(), "c.ht", three_per_leaf(3));
    for (start, end) in [(0, 10), (10, 20), (20, 30), (30, 50), (50, 80)] {
        tree.insert(iv(start, end)).expect("insert");
    }
    let branch = tree.latest_branch();
    let leaf = tree.read_node(*branch.last().expect("leaf")).expect("leaf");
    assert_eq!(leaf.end(), 80);
    assert!(!leaf.is_closed());

    tree.close_tree(100).expect("close");
    for seq in &branch {
        let node = tree.read_node(*seq).expect("node");
        assert!(node.is_closed());
        assert_eq!(node.end(), 100, "node {seq} end");
    }
    let root = tree.read_node(branch[0]).expect("root");
    assert_eq!(root.children().last().expect("child").end, 100);
    assert!(tree.is_closed());
    assert!(matches!(tree.insert(iv(90, 95)), Err(HistError::Invariant(_))));
}

#[test]
fn every_point_of_every_interval_is_found_after_close() {
    let dir = TempDir::new().expect("tempdir");
    let config = HistoryTreeConfig::new(0).block_size(512).max_children(4);
    let tree = create(dir.path(), "rt.ht", config);
    let mut inserted = Vec::new();
    for i in 0..300i64 {
        let attr = (i % 5) as u32;
        let start = i * 3;
        let end = start + (i % 7) * 2;
        let interval = Interval::new(start, end, attr, StateValue::Long(i)).expect("interval");
        tree.insert(interval.clone()).expect("insert");
        inserted.push(interval);
    }
    tree.close_tree(2_000).expect("close");
    assert!(tree.depth() >= 3);

    for interval in &inserted {
        for t in [interval.start(), (interval.start() + interval.end()) / 2, interval.end()] {
            let hits = tree.query(t).expect("query");
            assert!(hits.contains(interval), "{interval} missing at {t}");
            assert!(hits.iter().all(|hit| hit.contains(t)));
        }
        let single = tree
            .query_attribute(interval.start(), interval.attribute())
            .expect("query attribute");
        assert!(single.is_some());
    }

    let state = tree.query_state(600).expect("state");
    assert!(state.values().all(|hit| hit.contains(600)));
    assert!(tree.query(5_000).expect("past end").is_empty());
}

#[test]
fn storage_failure_poisons_the_tree() {
    use histree::primitives::io::{FaultyIo, FileIo, StdFileIo};

    let dir = TempDir::new().expect("tempdir");
    let io = Arc::new(FaultyIo::new(
        StdFileIo::create(dir.path().join("faulty.ht")).expect("file"),
    ));
    let tree =
        HistoryTree::create_with_io(io.clone() as Arc<dyn FileIo>, three_per_leaf(3)).expect("create");
    for t in 0..3 {
        tree.insert(iv(t, t + 1)).expect("insert");
    }
    io.fail_writes_after(0);

    let err = tree.insert(iv(3, 4)).expect_err("split must write the full leaf");
    assert!(matches!(err, HistError::Io(_)));
    assert!(tree.is_poisoned());
    assert!(matches!(tree.insert(iv(4, 5)), Err(HistError::Poisoned)));
    assert!(matches!(tree.query(0), Err(HistError::Poisoned)));
    assert!(matches!(tree.close_tree(10), Err(HistError::Poisoned)));
    assert!(HistError::Poisoned.requires_rebuild());
}

#[test]
fn readers_see_every_published_interval_while_the_writer_runs() {
    const READERS: usize = 4;
    const INTERVALS: i64 = 3_000;

    let dir = TempDir::new().expect("tempdir");
    let config = HistoryTreeConfig::new(0).block_size(1024).max_children(8);
    let tree = Arc::new(create(dir.path(), "mt.ht", config));
    let published = Arc::new(AtomicI64::new(-1));
    let barrier = Arc::new(Barrier::new(READERS + 1));

    let mut readers = Vec::new();
    for reader in 0..READERS {
        let tree = Arc::clone(&tree);
        let published = Arc::clone(&published);
        let barrier = Arc::clone(&barrier);
        readers.push(thread::spawn(move || {
            barrier.wait();
            let mut lookups = 0u64;
            loop {
                let upto = published.load(Ordering::Acquire);
                if upto >= 0 {
                    let t = (upto * 7 + reader as i64 * 13 + lookups as i64) % (upto + 1);
                    let hits = tree.query(t).expect("concurrent query");
                    assert_eq!(hits.len(), 1, "t={t} upto={upto}");
                    lookups += 1;
                }
                if upto == INTERVALS * 10 - 1 {
                    return lookups;
                }
            }
        }));
    }

    barrier.wait();
    for i in 0..INTERVALS {
        let interval = Interval::new(i * 10, i * 10 + 9, 0, StateValue::Long(i)).expect("interval");
        tree.insert(interval).expect("insert");
        published.store(i * 10 + 9, Ordering::Release);
    }
    for reader in readers {
        assert!(reader.join().expect("reader thread") > 0);
    }
    tree.close_tree(INTERVALS * 10).expect("close");
}

#[test]
fn backward_starts_keep_children_in_time_order() {
    for policy in [InsertPolicy::Sequential, InsertPolicy::Overlapping] {
        for seed in 0..6u64 {
            let dir = TempDir::new().expect("tempdir");
            let path = dir.path().join("back.ht");
            let tree = HistoryTree::create(&path, three_per_leaf(3).policy(policy))
                .expect("create tree");
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut cursor = 0i64;
            let mut inserted = Vec::new();
            for _ in 0..200 {
                let start = if rng.gen_bool(0.3) {
                    (cursor - rng.gen_range(1..40)).max(0)
                } else {
                    cursor += rng.gen_range(0..5);
                    cursor
                };
                let interval = iv(start, start + rng.gen_range(0..30));
                tree.insert(interval.clone()).expect("insert");
                inserted.push(interval);
            }
            let end = inserted.iter().map(Interval::end).max().expect("non-empty");
            tree.close_tree(end).expect("close");
            assert!(tree.depth() >= 3, "{policy:?} seed {seed}");

            for seq in 0..tree.node_count() {
                let node = tree.read_node(SeqNum(seq)).expect("node");
                let child_starts: Vec<i64> = node.children().iter().map(|c| c.start).collect();
                assert!(
                    child_starts.windows(2).all(|w| w[0] <= w[1]),
                    "{policy:?} seed {seed}: node {seq} children {child_starts:?}"
                );
            }
            for interval in &inserted {
                let hits = tree.query(interval.start()).expect("query");
                assert_eq!(
                    hits.iter().filter(|hit| *hit == interval).count(),
                    inserted.iter().filter(|other| *other == interval).count(),
                    "{policy:?} seed {seed}: {interval}"
                );
            }
            drop(tree);

            let report = verify(&path, &AdminOpenOptions::default(), VerifyLevel::Full)
                .expect("verify");
            assert!(report.success, "{policy:?} seed {seed}: {:?}", report.findings);
        }
    }
}
