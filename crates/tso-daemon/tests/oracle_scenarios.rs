//! End-to-end oracle scenarios over a shared in-memory store: concurrent
//! allocation ordering, leader handoffs, and advancer-driven window rolls.

use std::sync::Arc;
use std::time::Duration;

use tso_core::clock::{ManualClock, SystemClock, WallClock};
use tso_core::election::{FlagLeadership, Leadership};
use tso_core::store::{KvStore, MemoryStore};
use tso_core::timestamp::{MAX_LOGICAL, Timestamp};
use tso_daemon::advancer::Advancer;
use tso_daemon::config::OracleConfig;
use tso_daemon::oracle::{OracleError, TimestampOracle, encode_save_point};

const ROOT: &str = "tso";
const LEADER_KEY: &str = "tso/leader";
const TIMESTAMP_KEY: &str = "tso/timestamp";

fn oracle_for(
    store: &Arc<MemoryStore>,
    clock: Arc<dyn WallClock>,
    member: &str,
) -> (Arc<TimestampOracle>, Arc<FlagLeadership>) {
    let config = OracleConfig::builder().root_path(ROOT).member(member).build();
    let store_dyn: Arc<dyn KvStore> = store.clone();
    let oracle = Arc::new(TimestampOracle::new(config, store_dyn, clock, None));
    let leadership = Arc::new(FlagLeadership::new(member));
    leadership.assume();
    (oracle, leadership)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_allocations_are_strictly_monotonic() {
    let store = Arc::new(MemoryStore::new());
    store.put_unchecked(LEADER_KEY, b"tso-0".to_vec());
    let (oracle, leadership) = oracle_for(&store, Arc::new(SystemClock), "tso-0");

    let leadership_dyn: Arc<dyn Leadership> = leadership.clone();
    oracle.sync(leadership_dyn).await.unwrap();
    let advancer = Advancer::spawn(oracle.clone());

    const TASKS: usize = 8;
    const PER_TASK: usize = 200;

    let mut handles = Vec::with_capacity(TASKS);
    for task in 0..TASKS {
        let oracle = oracle.clone();
        handles.push(tokio::spawn(async move {
            let mut seen = Vec::with_capacity(PER_TASK);
            let mut prev: Option<Timestamp> = None;
            for i in 0..PER_TASK {
                let count = u32::try_from(task % 3 + 1).unwrap();
                let ts = oracle.allocate(count).await.unwrap();
                // Later in program order implies strictly greater (per task).
                if let Some(p) = prev {
                    assert!(ts > p, "timestamp went backwards: {p} -> {ts} at {i}");
                }
                prev = Some(ts);
                seen.push((ts, count));
            }
            seen
        }));
    }

    let mut all: Vec<(Timestamp, u32)> = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    advancer.stop().await;

    // Globally, every allocated range is exclusive: sorted by the returned
    // (highest) timestamp, each range must start past the previous one's end.
    all.sort_unstable_by_key(|(ts, _)| *ts);
    for pair in all.windows(2) {
        let (prev_ts, _) = pair[0];
        let (next_ts, next_count) = pair[1];
        assert!(next_ts.logical < MAX_LOGICAL);
        if next_ts.physical == prev_ts.physical {
            assert!(
                next_ts.logical - i64::from(next_count) >= prev_ts.logical,
                "overlapping ranges: {prev_ts} and {next_ts}(count {next_count})"
            );
        } else {
            assert!(next_ts.physical > prev_ts.physical);
        }
    }
}

#[tokio::test]
async fn leader_handoff_preserves_monotonicity() {
    let store = Arc::new(MemoryStore::new());

    // Term 1: node-a leads at wall 10_000_000 and persists save 10_003_000.
    store.put_unchecked(LEADER_KEY, b"node-a".to_vec());
    let clock_a = Arc::new(ManualClock::new(10_000_000));
    let (oracle_a, leadership_a) = oracle_for(&store, clock_a.clone(), "node-a");
    let leadership_a_dyn: Arc<dyn Leadership> = leadership_a.clone();
    oracle_a.sync(leadership_a_dyn).await.unwrap();

    // node-a advances to 10_002_500 and issues timestamps, then crashes
    // without resetting.
    clock_a.set(10_002_500);
    oracle_a.advance().await.unwrap();
    let last_a = oracle_a.allocate(3).await.unwrap();
    assert_eq!(last_a.physical, 10_002_500);
    drop(oracle_a);

    // Term 2: node-b acquires leadership with a wall clock behind node-a's
    // persisted save point.
    store.put_unchecked(LEADER_KEY, b"node-b".to_vec());
    let clock_b = Arc::new(ManualClock::new(10_002_000));
    let (oracle_b, leadership_b) = oracle_for(&store, clock_b, "node-b");
    let leadership_b_dyn: Arc<dyn Leadership> = leadership_b.clone();
    oracle_b.sync(leadership_b_dyn).await.unwrap();

    let first_b = oracle_b.allocate(1).await.unwrap();
    assert_eq!(first_b, Timestamp::new(10_003_001, 1));
    assert!(first_b > last_a, "handoff reissued time: {last_a} >= {first_b}");

    // The new save point leads node-b's window by the save interval.
    assert_eq!(
        store.read(TIMESTAMP_KEY).await.unwrap(),
        Some(encode_save_point(10_006_001).to_vec())
    );
}

#[tokio::test]
async fn repeated_handoffs_never_reissue() {
    let store = Arc::new(MemoryStore::new());
    // Every term starts with the same frozen wall clock, so each sync must
    // climb from the previous term's save point rather than the clock.
    let mut issued: Vec<Timestamp> = Vec::new();

    for term in 0..3 {
        let member = format!("node-{term}");
        store.put_unchecked(LEADER_KEY, member.as_bytes().to_vec());

        let clock = Arc::new(ManualClock::new(1_000_000));
        let (oracle, leadership) = oracle_for(&store, clock, &member);
        let leadership_dyn: Arc<dyn Leadership> = leadership.clone();
        oracle.sync(leadership_dyn).await.unwrap();

        for _ in 0..5 {
            issued.push(oracle.allocate(1).await.unwrap());
        }
    }

    for pair in issued.windows(2) {
        assert!(
            pair[1] > pair[0],
            "issuance order not monotonic: {} then {}",
            pair[0],
            pair[1]
        );
    }
}

#[tokio::test(start_paused = true)]
async fn advancer_rolls_window_under_logical_pressure() {
    let store = Arc::new(MemoryStore::new());
    store.put_unchecked(LEADER_KEY, b"tso-0".to_vec());
    let clock = Arc::new(ManualClock::new(5_000));
    let (oracle, leadership) = oracle_for(&store, clock, "tso-0");
    let leadership_dyn: Arc<dyn Leadership> = leadership.clone();
    oracle.sync(leadership_dyn).await.unwrap();

    let advancer = Advancer::spawn(oracle.clone());

    // Drain almost the whole logical space of the current millisecond.
    let first = oracle
        .allocate(u32::try_from(MAX_LOGICAL - 4).unwrap())
        .await
        .unwrap();
    assert_eq!(first, Timestamp::new(5_000, MAX_LOGICAL - 4));

    // The next request overflows; the advancer's tick rolls the physical
    // forward and the retry lands in the fresh window.
    let ts = oracle.allocate(10).await.unwrap();
    assert_eq!(ts, Timestamp::new(5_001, 10));

    advancer.stop().await;
}

#[tokio::test]
async fn sqlite_backed_save_point_survives_restart() {
    use tso_core::store::{Precondition, PutOutcome, SqliteStore};

    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("tso.db");

    // First process lifetime: claim the leader key, sync, allocate.
    {
        let store: Arc<dyn KvStore> = Arc::new(SqliteStore::open(&path).unwrap());
        let outcome = store
            .conditional_put(
                LEADER_KEY,
                b"tso-0".to_vec(),
                Precondition::KeyAbsent {
                    key: LEADER_KEY.to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, PutOutcome::Committed);

        let config = OracleConfig::builder().root_path(ROOT).member("tso-0").build();
        let oracle = TimestampOracle::new(
            config,
            store,
            Arc::new(ManualClock::new(1_000_000)),
            None,
        );
        let leadership = Arc::new(FlagLeadership::new("tso-0"));
        leadership.assume();
        let leadership_dyn: Arc<dyn Leadership> = leadership;
        oracle.sync(leadership_dyn).await.unwrap();
        oracle.allocate(100).await.unwrap();
    }
    // Drop simulates a crash; the save point stays on disk.

    // Second lifetime: the wall clock is behind the persisted save point,
    // yet the first timestamp issued still lands strictly past it.
    let store: Arc<dyn KvStore> = Arc::new(SqliteStore::open(&path).unwrap());
    let config = OracleConfig::builder().root_path(ROOT).member("tso-0").build();
    let oracle = TimestampOracle::new(config, store, Arc::new(ManualClock::new(999_000)), None);
    let leadership = Arc::new(FlagLeadership::new("tso-0"));
    leadership.assume();
    let leadership_dyn: Arc<dyn Leadership> = leadership;
    oracle.sync(leadership_dyn).await.unwrap();

    let ts = oracle.allocate(1).await.unwrap();
    assert_eq!(ts, Timestamp::new(1_003_001, 1));
}

#[tokio::test]
async fn reset_disarms_allocator_until_resync() {
    let store = Arc::new(MemoryStore::new());
    store.put_unchecked(LEADER_KEY, b"tso-0".to_vec());
    let (oracle, leadership) = oracle_for(&store, Arc::new(ManualClock::new(1_000_000)), "tso-0");

    let leadership_dyn: Arc<dyn Leadership> = leadership.clone();
    oracle.sync(leadership_dyn.clone()).await.unwrap();
    oracle.allocate(1).await.unwrap();

    leadership.step_down();
    oracle.reset();

    let err = oracle.allocate(1).await.unwrap_err();
    assert!(matches!(err, OracleError::NotLeader));

    leadership.assume();
    oracle.sync(leadership_dyn).await.unwrap();
    assert!(oracle.allocate(1).await.is_ok());
}
