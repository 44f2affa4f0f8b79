//! Admission behaviour of the request scheduler.
//!
//! Work items are gated on oneshot channels so each test decides exactly
//! when a request completes. The tokio clock is paused, which makes the
//! debounce delay advance deterministically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use slicewise_core::{CapacityPolicy, RequestCategory, RequestMetadata, SchedulerConfig};
use slicewise_scheduler::{FixedCapacity, Request, Scheduler, SchedulerPhase, SharedCapacity};
use tokio::sync::oneshot;

use RequestCategory::{Interaction, Prefetch, Thumbnail};

type Gate = oneshot::Sender<anyhow::Result<()>>;

/// Records dispatch order and holds each request's completion gate.
#[derive(Clone, Default)]
struct Harness {
    dispatched: Arc<Mutex<Vec<String>>>,
    gates: Arc<Mutex<HashMap<String, Gate>>>,
}

impl Harness {
    fn request(&self, category: RequestCategory, sub_priority: i32, name: &str) -> Request {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().insert(name.to_string(), tx);

        let dispatched = Arc::clone(&self.dispatched);
        let label = name.to_string();
        Request::new(category, move || {
            dispatched.lock().unwrap().push(label);
            async move { rx.await.unwrap_or(Ok(())) }
        })
        .with_sub_priority(sub_priority)
        .with_metadata(RequestMetadata::new().with("name", name))
    }

    fn submit(&self, scheduler: &Scheduler, category: RequestCategory, sub_priority: i32, name: &str) {
        scheduler.submit_request(self.request(category, sub_priority, name));
    }

    fn finish(&self, name: &str) {
        self.resolve(name, Ok(()));
    }

    fn fail(&self, name: &str) {
        self.resolve(name, Err(anyhow::anyhow!("fetch failed: {name}")));
    }

    fn resolve(&self, name: &str, result: anyhow::Result<()>) {
        let gate = self
            .gates
            .lock()
            .unwrap()
            .remove(name)
            .unwrap_or_else(|| panic!("no open gate for {name}"));
        let _ = gate.send(result);
    }

    fn dispatched(&self) -> Vec<String> {
        self.dispatched.lock().unwrap().clone()
    }
}

/// Let completions land and any debounced pass fire.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

// ── Category precedence ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn interaction_overtakes_earlier_prefetch() {
    let scheduler = Scheduler::with_defaults(FixedCapacity(6)).unwrap();
    let harness = Harness::default();

    for i in 0..10 {
        harness.submit(&scheduler, Prefetch, 0, &format!("p{i}"));
    }
    harness.submit(&scheduler, Interaction, 0, "i0");

    // Only the waking submission ran a pass.
    assert_eq!(harness.dispatched(), names(&["p0"]));

    harness.finish("p0");
    settle().await;

    assert_eq!(
        harness.dispatched(),
        names(&["p0", "i0", "p1", "p2", "p3", "p4", "p5"])
    );
    let snapshot = scheduler.snapshot();
    assert_eq!(snapshot.category(Interaction).in_flight, 1);
    assert_eq!(snapshot.category(Prefetch).in_flight, 5);
    assert_eq!(snapshot.category(Prefetch).capacity, 5);
    assert_eq!(snapshot.category(Prefetch).queued(), 4);
}

#[tokio::test(start_paused = true)]
async fn single_slot_admits_interaction_first() {
    let scheduler = Scheduler::with_defaults(FixedCapacity(1)).unwrap();
    let harness = Harness::default();

    scheduler.submit_all([
        harness.request(Prefetch, 0, "p"),
        harness.request(Thumbnail, 0, "t"),
        harness.request(Interaction, 0, "i"),
    ]);

    assert_eq!(harness.dispatched(), names(&["i"]));
    let snapshot = scheduler.snapshot();
    for category in RequestCategory::ALL {
        assert_eq!(snapshot.category(category).capacity, 1);
    }
    assert_eq!(snapshot.total_queued(), 2);

    harness.finish("i");
    settle().await;
    assert_eq!(harness.dispatched(), names(&["i", "t"]));

    harness.finish("t");
    settle().await;
    assert_eq!(harness.dispatched(), names(&["i", "t", "p"]));
}

#[tokio::test(start_paused = true)]
async fn precedence_ignores_submission_order() {
    let scheduler = Scheduler::with_defaults(FixedCapacity(6)).unwrap();
    let harness = Harness::default();

    scheduler.submit_all([
        harness.request(Prefetch, 0, "p1"),
        harness.request(Prefetch, 0, "p2"),
        harness.request(Thumbnail, 0, "t1"),
        harness.request(Interaction, 0, "i1"),
        harness.request(Interaction, 0, "i2"),
    ]);

    assert_eq!(harness.dispatched(), names(&["i1", "i2", "t1", "p1", "p2"]));
}

#[tokio::test(start_paused = true)]
async fn exhausted_category_is_skipped_not_waited_on() {
    let config = SchedulerConfig {
        capacity: CapacityPolicy {
            interaction_offset: 1,
            ..CapacityPolicy::default()
        },
        ..SchedulerConfig::default()
    };
    let scheduler = Scheduler::new(&config, FixedCapacity(3)).unwrap();
    let harness = Harness::default();

    scheduler.submit_all([
        harness.request(Interaction, 0, "i1"),
        harness.request(Interaction, 0, "i2"),
        harness.request(Interaction, 0, "i3"),
        harness.request(Prefetch, 0, "p1"),
    ]);

    // Interaction capacity is 2, so the third slot goes to prefetch.
    assert_eq!(harness.dispatched(), names(&["i1", "i2", "p1"]));

    harness.finish("p1");
    settle().await;
    // A free slot, but interaction is still at its ceiling.
    assert_eq!(harness.dispatched().len(), 3);

    harness.finish("i1");
    settle().await;
    assert_eq!(harness.dispatched(), names(&["i1", "i2", "p1", "i3"]));
}

// ── Ordering within a category ──────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn fifo_within_a_bucket() {
    let scheduler = Scheduler::with_defaults(FixedCapacity(1)).unwrap();
    let harness = Harness::default();

    for name in ["a", "b", "c", "d"] {
        harness.submit(&scheduler, Thumbnail, 0, name);
    }
    for name in ["a", "b", "c"] {
        harness.finish(name);
        settle().await;
    }

    assert_eq!(harness.dispatched(), names(&["a", "b", "c", "d"]));
}

#[tokio::test(start_paused = true)]
async fn lower_sub_priority_drains_first() {
    let scheduler = Scheduler::with_defaults(FixedCapacity(1)).unwrap();
    let harness = Harness::default();

    scheduler.submit_all([
        harness.request(Prefetch, 5, "late"),
        harness.request(Prefetch, 0, "mid1"),
        harness.request(Prefetch, -2, "first"),
        harness.request(Prefetch, 0, "mid2"),
    ]);

    for name in ["first", "mid1", "mid2"] {
        harness.finish(name);
        settle().await;
    }

    assert_eq!(harness.dispatched(), names(&["first", "mid1", "mid2", "late"]));
}

// ── Capacity ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn in_flight_never_exceeds_ceiling() {
    let scheduler = Scheduler::with_defaults(FixedCapacity(3)).unwrap();
    let harness = Harness::default();

    let categories = [Prefetch, Thumbnail, Interaction, Prefetch, Thumbnail];
    for i in 0..20 {
        harness.submit(&scheduler, categories[i % categories.len()], (i % 3) as i32, &format!("r{i}"));
    }

    let mut finished = 0;
    loop {
        let snapshot = scheduler.snapshot();
        assert!(snapshot.total_in_flight() <= 3, "ceiling exceeded: {snapshot:?}");
        for category in RequestCategory::ALL {
            let view = snapshot.category(category);
            assert!(view.in_flight <= view.capacity, "{category} over capacity");
        }

        let dispatched = harness.dispatched();
        if finished == dispatched.len() {
            break;
        }
        harness.finish(&dispatched[finished]);
        finished += 1;
        settle().await;
    }

    assert_eq!(finished, 20);
    assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn ceiling_changes_apply_on_next_pass() {
    let capacity = SharedCapacity::new(1);
    let scheduler = Scheduler::with_defaults(capacity.clone()).unwrap();
    let harness = Harness::default();

    scheduler.submit_all(["a", "b", "c", "d", "e", "f"].map(|n| harness.request(Prefetch, 0, n)));
    assert_eq!(harness.dispatched(), names(&["a"]));

    capacity.set(4);
    harness.finish("a");
    settle().await;
    // Prefetch ceiling at M = 4 is 3.
    assert_eq!(harness.dispatched(), names(&["a", "b", "c", "d"]));
    assert_eq!(scheduler.snapshot().category(Prefetch).capacity, 3);

    // Shrinking never preempts; it only throttles future dispatch.
    capacity.set(1);
    harness.finish("b");
    settle().await;
    let snapshot = scheduler.snapshot();
    assert_eq!(snapshot.category(Prefetch).capacity, 1);
    assert_eq!(snapshot.category(Prefetch).in_flight, 2);
    assert_eq!(harness.dispatched().len(), 4);

    harness.finish("c");
    settle().await;
    assert_eq!(harness.dispatched().len(), 4);

    harness.finish("d");
    settle().await;
    assert_eq!(harness.dispatched(), names(&["a", "b", "c", "d", "e"]));
}

// ── Completion accounting ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn failed_work_frees_its_slot() {
    let scheduler = Scheduler::with_defaults(FixedCapacity(1)).unwrap();
    let harness = Harness::default();

    harness.submit(&scheduler, Interaction, 0, "a");
    harness.submit(&scheduler, Interaction, 0, "b");

    harness.fail("a");
    settle().await;
    assert_eq!(harness.dispatched(), names(&["a", "b"]));

    harness.finish("b");
    settle().await;
    let stats = scheduler.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.outstanding(), 0);
}

async fn crashing_decode() -> anyhow::Result<()> {
    panic!("decoder crashed")
}

#[tokio::test(start_paused = true)]
async fn panicking_work_frees_its_slot() {
    let scheduler = Scheduler::with_defaults(FixedCapacity(1)).unwrap();
    let harness = Harness::default();

    scheduler.submit_request(Request::new(Prefetch, crashing_decode));
    harness.submit(&scheduler, Prefetch, 0, "next");
    settle().await;

    assert_eq!(harness.dispatched(), names(&["next"]));
    assert_eq!(scheduler.stats().failed, 1);
    assert_eq!(scheduler.in_flight(Prefetch), 1);
}

fn corrupt_header() -> std::future::Ready<anyhow::Result<()>> {
    panic!("corrupt slice header")
}

#[tokio::test(start_paused = true)]
async fn panic_while_starting_does_not_lose_the_rest_of_the_pass() {
    let scheduler = Scheduler::with_defaults(FixedCapacity(3)).unwrap();
    let harness = Harness::default();

    scheduler.submit_all([
        Request::new(Interaction, corrupt_header),
        harness.request(Interaction, 0, "b"),
        harness.request(Interaction, 0, "c"),
    ]);

    assert_eq!(harness.dispatched(), names(&["b", "c"]));
    assert_eq!(scheduler.pending(), 0);
    assert_eq!(scheduler.in_flight(Interaction), 2);
    assert_eq!(scheduler.stats().failed, 1);

    harness.finish("b");
    harness.finish("c");
    settle().await;
    let stats = scheduler.stats();
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.outstanding(), 0);
    assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn near_simultaneous_completions_coalesce() {
    let scheduler = Scheduler::with_defaults(FixedCapacity(2)).unwrap();
    let harness = Harness::default();

    scheduler.submit_all(["a", "b", "c", "d"].map(|n| harness.request(Interaction, 0, n)));
    assert_eq!(harness.dispatched(), names(&["a", "b"]));
    assert_eq!(scheduler.stats().admission_passes, 1);

    harness.finish("a");
    harness.finish("b");
    settle().await;

    assert_eq!(harness.dispatched(), names(&["a", "b", "c", "d"]));
    assert_eq!(scheduler.stats().admission_passes, 2);
}

// ── Re-entrancy ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn submissions_from_work_wait_for_next_pass() {
    let scheduler = Scheduler::with_defaults(FixedCapacity(6)).unwrap();
    let harness = Harness::default();

    let child = harness.request(Interaction, 0, "child");
    let (tx, rx) = oneshot::channel::<()>();
    let handle = scheduler.clone();
    scheduler.submit(Interaction, RequestMetadata::new(), 0, move || {
        handle.submit_request(child);
        async move {
            let _ = rx.await;
            Ok(())
        }
    });

    // Plenty of free slots, but the child arrived mid-pass.
    assert!(harness.dispatched().is_empty());
    assert_eq!(scheduler.pending(), 1);
    assert_eq!(scheduler.stats().admission_passes, 1);

    tx.send(()).unwrap();
    settle().await;
    assert_eq!(harness.dispatched(), names(&["child"]));
}

// ── Filter / clear ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn filter_drops_only_rejected_queued_requests() {
    let scheduler = Scheduler::with_defaults(FixedCapacity(1)).unwrap();
    let harness = Harness::default();

    scheduler.submit_all([
        harness.request(Interaction, 0, "ct-b/i"),
        harness.request(Thumbnail, 0, "ct-a/t"),
        harness.request(Prefetch, 0, "ct-a/0"),
        harness.request(Prefetch, 1, "ct-b/1"),
        harness.request(Prefetch, 0, "ct-a/2"),
    ]);
    assert_eq!(harness.dispatched(), names(&["ct-b/i"]));

    let removed = scheduler.filter(|r| {
        !r.metadata()
            .get_str("name")
            .is_some_and(|name| name.starts_with("ct-a/"))
    });

    assert_eq!(removed, 3);
    let snapshot = scheduler.snapshot();
    assert_eq!(snapshot.total_queued(), 1);
    assert_eq!(snapshot.category(Interaction).in_flight, 1);
    assert_eq!(snapshot.stats.discarded, 3);
    let remaining: Vec<_> = snapshot
        .category(Prefetch)
        .requests()
        .map(|r| r.metadata.get_str("name").unwrap().to_string())
        .collect();
    assert_eq!(remaining, names(&["ct-b/1"]));

    harness.finish("ct-b/i");
    settle().await;
    assert_eq!(harness.dispatched(), names(&["ct-b/i", "ct-b/1"]));
}

#[tokio::test(start_paused = true)]
async fn panicking_filter_keeps_queued_requests() {
    let scheduler = Scheduler::with_defaults(FixedCapacity(1)).unwrap();
    let harness = Harness::default();

    for i in 0..5 {
        harness.submit(&scheduler, Prefetch, 0, &format!("p{i}"));
    }
    assert_eq!(scheduler.pending(), 4);

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        scheduler.filter(|r| {
            assert_ne!(r.metadata().get_str("name"), Some("p3"), "predicate blew up");
            false
        })
    }));
    assert!(result.is_err());

    assert_eq!(scheduler.pending(), 4);
    assert_eq!(scheduler.stats().discarded, 0);

    // The scheduler keeps working afterwards.
    assert_eq!(scheduler.filter(|_| false), 4);
    harness.finish("p0");
    settle().await;
    assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn clear_leaves_in_flight_work_alone() {
    let scheduler = Scheduler::with_defaults(FixedCapacity(1)).unwrap();
    let harness = Harness::default();

    scheduler.submit_all([
        harness.request(Prefetch, 3, "p0"),
        harness.request(Prefetch, -1, "p1"),
        harness.request(Prefetch, 0, "p2"),
        harness.request(Thumbnail, 0, "t0"),
    ]);
    assert_eq!(harness.dispatched(), names(&["t0"]));

    assert_eq!(scheduler.clear(Prefetch), 3);
    let snapshot = scheduler.snapshot();
    let buckets = &snapshot.category(Prefetch).buckets;
    assert_eq!(buckets.keys().copied().collect::<Vec<_>>(), vec![0]);
    assert!(buckets[&0].is_empty());
    assert_eq!(snapshot.category(Thumbnail).in_flight, 1);

    harness.finish("t0");
    settle().await;

    assert_eq!(scheduler.in_flight(Thumbnail), 0);
    assert_eq!(scheduler.stats().completed, 1);
    assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn snapshot_is_a_detached_copy() {
    let scheduler = Scheduler::with_defaults(FixedCapacity(1)).unwrap();
    let harness = Harness::default();

    harness.submit(&scheduler, Prefetch, 0, "a");
    harness.submit(&scheduler, Prefetch, 2, "b");

    let mut snapshot = scheduler.snapshot();
    snapshot.categories.clear();
    snapshot.stats.submitted = 0;

    let fresh = scheduler.snapshot();
    assert_eq!(fresh.categories.len(), 3);
    assert_eq!(fresh.stats.submitted, 2);
    assert_eq!(fresh.category(Prefetch).buckets[&2].len(), 1);

    let json = serde_json::to_value(&fresh).unwrap();
    assert_eq!(json["phase"], "awake");
    assert_eq!(json["categories"][2]["category"], "prefetch");
    assert_eq!(json["categories"][2]["buckets"]["2"][0]["metadata"]["name"], "b");
}

// ── Idle / awake lifecycle ──────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn scheduler_goes_idle_after_draining() {
    let scheduler = Scheduler::with_defaults(FixedCapacity(6)).unwrap();
    let harness = Harness::default();

    for name in ["a", "b", "c"] {
        harness.submit(&scheduler, Thumbnail, 0, name);
    }
    assert!(scheduler.is_awake());

    harness.finish("a");
    settle().await;
    harness.finish("b");
    harness.finish("c");
    settle().await;

    assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
    let passes = scheduler.stats().admission_passes;

    // No further passes while idle.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(scheduler.stats().admission_passes, passes);

    // The next submission wakes it with an immediate pass.
    harness.submit(&scheduler, Thumbnail, 0, "d");
    assert_eq!(scheduler.stats().admission_passes, passes + 1);
    assert_eq!(harness.dispatched().last().map(String::as_str), Some("d"));
}

#[tokio::test(start_paused = true)]
async fn stays_awake_while_work_is_in_flight() {
    let scheduler = Scheduler::with_defaults(FixedCapacity(6)).unwrap();
    let harness = Harness::default();

    harness.submit(&scheduler, Interaction, 0, "a");
    settle().await;

    assert_eq!(scheduler.pending(), 0);
    assert!(scheduler.is_awake());

    harness.finish("a");
    settle().await;
    assert!(!scheduler.is_awake());
}

// ── Multi-threaded host ─────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submitters_respect_ceiling() {
    const CEILING: usize = 4;
    const PER_TASK: usize = 50;

    let scheduler = Scheduler::with_defaults(FixedCapacity(CEILING)).unwrap();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut submitters = Vec::new();
    for t in 0..4 {
        let scheduler = scheduler.clone();
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        submitters.push(tokio::spawn(async move {
            for i in 0..PER_TASK {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                let category = RequestCategory::ALL[(t + i) % 3];
                scheduler.submit(category, RequestMetadata::new(), (i % 4) as i32, move || async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                });
                tokio::task::yield_now().await;
            }
        }));
    }
    for submitter in submitters {
        submitter.await.unwrap();
    }

    let total = (4 * PER_TASK) as u64;
    for _ in 0..1000 {
        let stats = scheduler.stats();
        if stats.completed == total && !scheduler.is_awake() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let stats = scheduler.stats();
    assert_eq!(stats.submitted, total);
    assert_eq!(stats.completed, total);
    assert!(peak.load(Ordering::SeqCst) <= CEILING);
    assert_eq!(scheduler.snapshot().total_in_flight(), 0);
    assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
}
