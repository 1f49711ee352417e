//! Integration Tests for the Reactive Engine
//!
//! These tests verify that observable views, effects, computed cells and the
//! scheduler work together correctly.

use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use ripple_core::observable::{is_reactive, reactive, readonly, to_raw, Target, Value};
use ripple_core::reactive::{
    effect, effect_with, watch, Computed, ComputedState, EffectOptions, EffectScope, FlushMode, OnCleanup, Ref,
    WatchOptions,
};
use ripple_core::scheduler::{
    next_tick, queue_job, queue_post_flush_cb, run_microtasks, JobOptions, SchedulerJob,
};
use ripple_core::ReactiveError;

type Log = Arc<Mutex<Vec<&'static str>>>;

fn log_job(log: &Log, name: &'static str, id: Option<u32>, pre: bool) -> SchedulerJob {
    let log = log.clone();
    SchedulerJob::with_options(
        move || log.lock().push(name),
        JobOptions {
            id,
            pre,
            ..JobOptions::default()
        },
    )
}

/// Test that a bare effect re-runs synchronously on write.
#[test]
fn effect_observes_field_write() {
    let state = reactive(Target::from_props([("num", 0)]));
    let observed = Arc::new(AtomicI64::new(-1));

    let _runner = effect({
        let state = state.clone();
        let observed = observed.clone();
        move || observed.store(state.get("num").as_i64().unwrap_or(-1), Ordering::SeqCst)
    });
    assert_eq!(observed.load(Ordering::SeqCst), 0);

    state.set("num", 7).unwrap();
    assert_eq!(observed.load(Ordering::SeqCst), 7);
}

/// Test that a computed getter runs only when read, and only once per change.
#[test]
fn computed_is_lazy() {
    let count = Ref::new(1);
    let runs = Arc::new(AtomicI32::new(0));

    let doubled = Computed::new({
        let count = count.clone();
        let runs = runs.clone();
        move || {
            runs.fetch_add(1, Ordering::SeqCst);
            count.get() * 2
        }
    });
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    assert_eq!(doubled.get(), 2);
    assert_eq!(doubled.get(), 2);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    count.set(4);
    assert_eq!(doubled.state(), ComputedState::Dirty);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(doubled.get(), 8);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// Test that two writes before a read cost one recompute.
#[test]
fn computed_recomputes_once_for_several_changes() {
    let state = reactive(Target::from_props([("a", 1), ("b", 2)]));
    let runs = Arc::new(AtomicI32::new(0));

    let sum = Computed::new({
        let state = state.clone();
        let runs = runs.clone();
        move || {
            runs.fetch_add(1, Ordering::SeqCst);
            state.get("a").as_i64().unwrap_or_default() + state.get("b").as_i64().unwrap_or_default()
        }
    });
    assert_eq!(sum.get(), 3);

    state.set("a", 10).unwrap();
    state.set("b", 20).unwrap();
    assert_eq!(sum.get(), 30);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// Test that an equal write notifies nobody.
#[test]
fn equal_write_is_a_no_op() {
    let value = Ref::new(0);
    let runs = Arc::new(AtomicI32::new(0));

    let _runner = effect({
        let value = value.clone();
        let runs = runs.clone();
        move || {
            value.get();
            runs.fetch_add(1, Ordering::SeqCst);
        }
    });

    value.set(2);
    value.set(2);
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    let state = reactive(Target::from_props([("n", f64::NAN)]));
    let field_runs = Arc::new(AtomicI32::new(0));
    let _field_runner = effect({
        let state = state.clone();
        let field_runs = field_runs.clone();
        move || {
            state.get("n");
            field_runs.fetch_add(1, Ordering::SeqCst);
        }
    });
    state.set("n", f64::NAN).unwrap();
    assert_eq!(field_runs.load(Ordering::SeqCst), 1);
}

/// Test that a plain object assigned into a view is observed through the
/// parent, and that nested writes only notify readers of the nested path.
#[test]
fn nested_assignment_becomes_observable() {
    let state = reactive(Target::object());
    state.set("user", Target::from_props([("name", "ada")])).unwrap();

    let user = state.get("user");
    assert!(is_reactive(&user));

    let root_runs = Arc::new(AtomicI32::new(0));
    let name_runs = Arc::new(AtomicI32::new(0));
    let _root = effect({
        let state = state.clone();
        let root_runs = root_runs.clone();
        move || {
            state.own_keys();
            root_runs.fetch_add(1, Ordering::SeqCst);
        }
    });
    let _name = effect({
        let state = state.clone();
        let name_runs = name_runs.clone();
        move || {
            state.get("user").get("name");
            name_runs.fetch_add(1, Ordering::SeqCst);
        }
    });

    state.get("user").set("name", "grace").unwrap();
    assert_eq!(name_runs.load(Ordering::SeqCst), 2);
    assert_eq!(root_runs.load(Ordering::SeqCst), 1);
}

/// Test that wrapping is idempotent and reversible.
#[test]
fn wrapping_is_idempotent() {
    let raw = Target::from_props([("x", 1)]);
    let view = reactive(raw.clone());

    assert_eq!(reactive(raw.clone()), view);
    assert_eq!(reactive(view.clone()), view);
    assert_eq!(to_raw(&view), Value::from(raw.clone()));

    let locked = readonly(view.clone());
    assert_eq!(readonly(view.clone()), locked);
    assert_eq!(to_raw(&locked), Value::from(raw));
}

/// Test that writes through a readonly view are rejected and leave the
/// target untouched.
#[test]
fn readonly_write_is_rejected() {
    let state = reactive(Target::from_props([("x", 1)]));
    let locked = readonly(state.clone());

    let error = locked.set("x", 2).unwrap_err();
    assert!(matches!(error, ReactiveError::Readonly { .. }));
    assert_eq!(state.get("x"), Value::from(1));
}

/// Test that an effect stopped from a nested effect during its own run
/// leaves the field usable for later subscribers.
#[test]
fn stop_during_outer_run_keeps_field_trackable() {
    let state = reactive(Target::from_props([("x", 0)]));
    let slot: Arc<Mutex<Option<ripple_core::reactive::WeakEffect>>> = Arc::default();

    let outer = effect_with(
        {
            let state = state.clone();
            let slot = slot.clone();
            move || {
                state.get("x");
                let slot = slot.clone();
                effect(move || {
                    let outer = slot.lock().as_ref().and_then(|weak| weak.upgrade());
                    if let Some(outer) = outer {
                        outer.stop();
                    }
                });
            }
        },
        EffectOptions::default().lazy(),
    );
    *slot.lock() = Some(outer.downgrade());
    outer.run();
    assert!(!outer.is_active());

    let runs = Arc::new(AtomicI32::new(0));
    let _fresh = effect({
        let state = state.clone();
        let runs = runs.clone();
        move || {
            state.get("x");
            runs.fetch_add(1, Ordering::SeqCst);
        }
    });

    state.set("x", 1).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// Test that out-of-range array lengths and indices fail instead of
/// panicking.
#[test]
fn oversized_array_writes_are_errors() {
    let list = reactive(Target::array());

    assert_eq!(list.set("length", 1e20), Err(ReactiveError::InvalidLength(1e20)));
    assert!(matches!(
        list.set(usize::MAX, 1),
        Err(ReactiveError::Unsupported { .. })
    ));
    assert!(list.is_empty());
}

/// Test that stopping a scope stops every effect created inside it.
#[test]
fn scope_stops_collected_effects() {
    let count = Ref::new(0);
    let runs = Arc::new(AtomicI32::new(0));
    let scope = EffectScope::new();

    scope.run(|| {
        let count = count.clone();
        let runs = runs.clone();
        effect(move || {
            count.get();
            runs.fetch_add(1, Ordering::SeqCst);
        });
    });
    assert_eq!(scope.effect_count(), 1);

    scope.stop();
    count.set(1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

/// Test that jobs run by id, pre jobs first on equal ids.
#[test]
fn scheduler_orders_jobs() {
    let log: Log = Arc::default();

    queue_job(log_job(&log, "ten", Some(10), false));
    queue_job(log_job(&log, "one", Some(1), false));
    queue_job(log_job(&log, "one-pre", Some(1), true));
    run_microtasks();

    assert_eq!(*log.lock(), vec!["one-pre", "one", "ten"]);
}

/// Test that a job queued twice runs once per flush.
#[test]
fn scheduler_dedupes_jobs() {
    let log: Log = Arc::default();
    let job = log_job(&log, "job", Some(1), false);

    queue_job(job.clone());
    queue_job(job);
    run_microtasks();

    assert_eq!(log.lock().len(), 1);
}

/// Test that effects with a scheduler batch their re-runs.
#[test]
fn scheduled_effect_runs_once_per_tick() {
    let count = Ref::new(0);
    let runs = Arc::new(AtomicI32::new(0));

    let slot: Arc<Mutex<Option<SchedulerJob>>> = Arc::default();
    let runner = effect_with(
        {
            let count = count.clone();
            let runs = runs.clone();
            move || {
                count.get();
                runs.fetch_add(1, Ordering::SeqCst);
            }
        },
        EffectOptions::default().scheduler({
            let slot = slot.clone();
            move || {
                if let Some(job) = slot.lock().clone() {
                    queue_job(job);
                }
            }
        }),
    );
    let weak = runner.downgrade();
    *slot.lock() = Some(SchedulerJob::new(move || {
        if let Some(runner) = weak.upgrade() {
            runner.run();
        }
    }));

    count.set(1);
    count.set(2);
    count.set(3);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    run_microtasks();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// Test that a pre job queued from a post-flush callback still runs in the
/// same tick.
#[tokio::test]
async fn pre_job_queued_after_drain_runs() {
    let log: Log = Arc::default();

    let c = log_job(&log, "c", None, true);
    let b = {
        let log = log.clone();
        SchedulerJob::new(move || {
            log.lock().push("b");
            queue_job(c.clone());
        })
    };
    let a = {
        let log = log.clone();
        SchedulerJob::with_options(
            move || {
                log.lock().push("a");
                queue_post_flush_cb(b.clone());
            },
            JobOptions {
                pre: true,
                ..JobOptions::default()
            },
        )
    };

    queue_job(a);
    next_tick().await;

    assert_eq!(*log.lock(), vec!["a", "b", "c"]);
}

/// Test that a watcher sees the settled value once per tick.
#[tokio::test]
async fn watcher_batches_writes() {
    let state = reactive(Target::from_props([("count", 0)]));
    let seen: Arc<Mutex<Vec<(i64, Option<i64>)>>> = Arc::default();

    let _handle = watch(
        {
            let state = state.clone();
            move || state.get("count").as_i64().unwrap_or_default()
        },
        {
            let seen = seen.clone();
            move |new: &i64, old: Option<&i64>, _: &OnCleanup| seen.lock().push((*new, old.copied()))
        },
        WatchOptions::default().flush(FlushMode::Pre),
    );

    state.set("count", 1).unwrap();
    state.set("count", 2).unwrap();
    next_tick().await;

    assert_eq!(*seen.lock(), vec![(2, Some(0))]);
}
