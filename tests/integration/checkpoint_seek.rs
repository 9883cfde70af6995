#![allow(missing_docs)]

use std::collections::HashMap;

use histree::checkpoint::{
    seek_event_by_rank, seek_event_by_timestamp, MemoryEvent, MemoryTrace, DEFAULT_CHECKPOINT_INTERVAL,
};
use histree::{
    AttributeId, CancelToken, CheckpointIndex, HistError, HistoryTree, HistoryTreeConfig, Interval,
    StateValue, Timestamp, TraceIndexer, TraceReader,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;

fn random_trace(seed: u64, events: usize) -> MemoryTrace {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut ts: Timestamp = 0;
    let events = (0..events)
        .map(|i| {
            // Bursts of identical timestamps are common in real traces.
            if rng.gen_bool(0.7) {
                ts += rng.gen_range(1..50);
            }
            MemoryEvent {
                timestamp: ts,
                attribute: rng.gen_range(0..8),
                value: i as i64,
            }
        })
        .collect();
    MemoryTrace::new(events)
}

fn linear_seek(trace: &MemoryTrace, timestamp: Timestamp) -> u64 {
    trace
        .events()
        .iter()
        .position(|event| event.timestamp >= timestamp)
        .unwrap_or(trace.len()) as u64
}

#[test]
fn timestamp_between_checkpoints_resolves_to_the_earlier_one() {
    const K: u64 = 50;
    let mut trace = MemoryTrace::from_timestamps((0..1_000).map(|i| i * 10), 4);
    let (index, _) = TraceIndexer::new(K).build(&mut trace).expect("index");
    assert_eq!(index.len(), 20);

    for i in 0..index.len() - 1 {
        let here = index.get(i).expect("checkpoint");
        let next = index.get(i + 1).expect("checkpoint");
        assert_eq!(here.rank, i as u64 * K);
        let target = (here.timestamp + next.timestamp) / 2;
        let found = index.binary_search(target);
        assert!(found < 0);
        assert_eq!((-(found + 2)).max(0) as usize, i);
        assert_eq!(index.seek_timestamp(target).rank, here.rank);
    }
}

#[test]
fn timestamp_seek_matches_a_linear_scan() {
    let mut trace = random_trace(7, 5_000);
    let (index, summary) = TraceIndexer::new(64).build(&mut trace).expect("index");
    assert_eq!(summary.events, 5_000);
    let last = trace.events().last().expect("events").timestamp;

    let mut rng = ChaCha8Rng::seed_from_u64(99);
    for _ in 0..500 {
        let target = rng.gen_range(-10..last + 10);
        let ctx = seek_event_by_timestamp(&mut trace, &index, target).expect("seek");
        assert_eq!(ctx.rank, linear_seek(&trace, target), "target {target}");
    }
    // Every timestamp shared by a burst resolves to the first event of the burst.
    let timestamps: Vec<Timestamp> = trace.events().iter().map(|event| event.timestamp).collect();
    for (rank, timestamp) in timestamps.into_iter().enumerate() {
        let ctx = seek_event_by_timestamp(&mut trace, &index, timestamp).expect("seek");
        assert!(ctx.rank <= rank as u64);
        assert_eq!(ctx.rank, linear_seek(&trace, timestamp));
    }
}

#[test]
fn rank_seek_reads_the_exact_event() {
    let mut trace = random_trace(11, 2_000);
    let (index, _) = TraceIndexer::new(100).build(&mut trace).expect("index");
    for rank in [0u64, 1, 99, 100, 101, 1_234, 1_999] {
        let mut ctx = seek_event_by_rank(&mut trace, &index, rank).expect("seek");
        assert_eq!(ctx.rank, rank);
        let event = trace.read_next(&mut ctx).expect("read").expect("event");
        assert_eq!(event.value, rank as i64);
    }
    let mut end = seek_event_by_rank(&mut trace, &index, 10_000).expect("seek past end");
    assert_eq!(end.rank, 2_000);
    assert!(trace.read_next(&mut end).expect("read").is_none());
}

#[test]
fn empty_index_seeks_from_the_trace_start() {
    let mut trace = MemoryTrace::from_timestamps([5, 6, 7], 1);
    let index: CheckpointIndex<usize> =
        CheckpointIndex::new(DEFAULT_CHECKPOINT_INTERVAL).expect("index");
    let ctx = seek_event_by_timestamp(&mut trace, &index, 6).expect("seek");
    assert_eq!(ctx.rank, 1);
    let ctx = seek_event_by_rank(&mut trace, &index, 2).expect("seek");
    assert_eq!(ctx.rank, 2);
}

#[test]
fn saved_index_seeks_like_the_original() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("trace.ckpt");
    let mut trace = random_trace(3, 3_000);
    let (index, _) = TraceIndexer::new(128).build(&mut trace).expect("index");
    index.save(&path).expect("save");

    let loaded = CheckpointIndex::<usize>::load(&path).expect("load");
    assert_eq!(loaded, index);
    assert_eq!(loaded.interval(), 128);
    for target in [0, 100, 5_000, 20_000] {
        assert_eq!(loaded.seek_timestamp(target), index.seek_timestamp(target));
    }

    let mut bytes = std::fs::read(&path).expect("read");
    bytes.truncate(bytes.len() / 2);
    std::fs::write(&path, &bytes).expect("write");
    assert!(matches!(
        CheckpointIndex::<usize>::load(&path),
        Err(HistError::Format(_))
    ));
}

#[test]
fn indexing_job_feeds_the_history_tree() {
    let dir = TempDir::new().expect("tempdir");
    let mut trace = random_trace(21, 4_000);
    let tree = HistoryTree::create(dir.path().join("job.ht"), HistoryTreeConfig::compact(0))
        .expect("create");

    // Each attribute keeps its value until its next event.
    let mut open: HashMap<AttributeId, (Timestamp, StateValue)> = HashMap::new();
    let (index, summary) = TraceIndexer::new(250)
        .build_with(&mut trace, |event, _rank| {
            let attribute = event.attribute_id();
            if let Some((start, value)) = open.remove(&attribute) {
                if event.timestamp > start {
                    tree.insert(Interval::new(start, event.timestamp - 1, attribute, value)?)?;
                }
            }
            open.insert(attribute, (event.timestamp, event.state_value()));
            Ok(())
        })
        .expect("index");
    let end = summary.end_time.expect("non-empty trace");
    for (attribute, (start, value)) in open {
        tree.insert(Interval::new(start, end, attribute, value).expect("interval"))
            .expect("insert");
    }
    tree.close_tree(end).expect("close");
    assert_eq!(index.len(), 16);

    // The state at any time equals the last value each attribute took before it.
    let events = trace.events();
    for target in [events[100].timestamp, events[2_000].timestamp, end] {
        let state = tree.query_state(target).expect("state");
        for (attribute, interval) in &state {
            let last = events
                .iter()
                .filter(|e| e.attribute_id() == *attribute && e.timestamp <= target)
                .filter(|e| e.timestamp >= interval.start())
                .last()
                .expect("an event set this state");
            assert_eq!(interval.value(), &last.state_value());
        }
    }
}

#[test]
fn canceled_indexing_returns_no_index() {
    let mut trace = random_trace(5, 1_000);
    let token = CancelToken::new();
    let job_token = token.clone();
    let result = TraceIndexer::new(10)
        .with_cancel(job_token)
        .build_with(&mut trace, |_, rank| {
            if rank == 500 {
                token.cancel();
            }
            Ok(())
        });
    assert!(matches!(result, Err(HistError::Canceled)));
}
