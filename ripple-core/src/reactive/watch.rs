//! Watchers
//!
//! Watchers connect reactive state to callbacks through the scheduler.
//!
//! - [`watch`] re-evaluates a getter when its dependencies change and calls
//!   the callback with the new and previous value if the value changed (or
//!   always, for deep watchers).
//! - [`watch_observable`] deep-watches a view.
//! - [`watch_effect`] re-runs a function.
//!
//! When the re-evaluation happens is decided by [`FlushMode`]: queued as a
//! `pre` job, as a post-flush callback, or synchronously on trigger.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::effect::{ReactiveEffect, WeakEffect};
use super::refs::RefValue;
use crate::observable::Value;
use crate::scheduler::{queue_job, queue_post_flush_cb, JobOptions, SchedulerJob};

/// When a triggered watcher re-runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Queued as a `pre` job of the next flush.
    #[default]
    Pre,

    /// Queued as a post-flush callback.
    Post,

    /// Runs immediately on trigger.
    Sync,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    /// Call the callback once at creation.
    pub immediate: bool,

    /// Track every nested key of the value and call the callback on every
    /// trigger.
    pub deep: bool,

    pub flush: FlushMode,
}

impl WatchOptions {
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    pub fn flush(mut self, flush: FlushMode) -> Self {
        self.flush = flush;
        self
    }
}

type CleanupFn = Box<dyn FnOnce() + Send>;

/// Registers a cleanup that runs before the watcher's next run and when it
/// stops.
#[derive(Clone, Default)]
pub struct OnCleanup {
    slot: Arc<Mutex<Option<CleanupFn>>>,
}

impl OnCleanup {
    /// Replace the pending cleanup with `f`.
    pub fn register(&self, f: impl FnOnce() + Send + 'static) {
        *self.slot.lock() = Some(Box::new(f));
    }

    fn run_pending(&self) {
        let pending = self.slot.lock().take();
        if let Some(cleanup) = pending {
            cleanup();
        }
    }
}

/// Returned by the watch functions.
#[derive(Debug, Clone)]
pub struct WatchHandle {
    effect: ReactiveEffect,
}

impl WatchHandle {
    /// Stop watching and run the pending cleanup.
    pub fn stop(&self) {
        self.effect.stop();
    }

    pub fn is_active(&self) -> bool {
        self.effect.is_active()
    }

    pub fn effect(&self) -> &ReactiveEffect {
        &self.effect
    }
}

/// Builds the effect and the job that re-runs it, wired through `flush`.
fn build_watcher<B, J>(body: B, job: J, flush: FlushMode, allow_recurse: bool, on_cleanup: &OnCleanup) -> (ReactiveEffect, SchedulerJob)
where
    B: Fn() + Send + Sync + 'static,
    J: Fn(&ReactiveEffect) + Send + Sync + 'static,
{
    let slot: Arc<OnceLock<WeakEffect>> = Arc::new(OnceLock::new());
    let job = SchedulerJob::with_options(
        {
            let slot = slot.clone();
            move || {
                let Some(effect) = slot.get().and_then(WeakEffect::upgrade) else {
                    return;
                };
                if effect.is_active() {
                    job(&effect);
                }
            }
        },
        JobOptions {
            id: None,
            pre: flush == FlushMode::Pre,
            allow_recurse,
        },
    );

    let scheduler = {
        let job = job.clone();
        move || match flush {
            FlushMode::Pre => queue_job(job.clone()),
            FlushMode::Post => queue_post_flush_cb(job.clone()),
            FlushMode::Sync => job.run(),
        }
    };

    let effect = ReactiveEffect::with_scheduler(body, scheduler);
    // the slot is created empty above and filled only here
    let _ = slot.set(effect.downgrade());

    let cleanup = on_cleanup.clone();
    effect.set_on_stop(Some(Arc::new(move || cleanup.run_pending())));
    (effect, job)
}

/// Watch the value produced by `getter`.
///
/// `callback` receives the new value, the previous one (`None` on the first
/// call) and a handle for registering cleanups.
pub fn watch<T, G, C>(getter: G, callback: C, options: WatchOptions) -> WatchHandle
where
    T: RefValue,
    G: Fn() -> T + Send + Sync + 'static,
    C: Fn(&T, Option<&T>, &OnCleanup) + Send + Sync + 'static,
{
    let deep = options.deep;
    let latest: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
    let old: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
    let on_cleanup = OnCleanup::default();

    let body = {
        let latest = latest.clone();
        move || {
            let value = getter();
            if deep {
                value.traverse();
            }
            *latest.lock() = Some(value);
        }
    };

    let job = {
        let latest = latest.clone();
        let old = old.clone();
        let on_cleanup = on_cleanup.clone();
        move |effect: &ReactiveEffect| {
            effect.run();
            let Some(new) = latest.lock().take() else {
                return;
            };
            let previous = old.lock().take();
            let changed = deep || previous.as_ref().map_or(true, |previous| !new.same_value(previous));
            if changed {
                on_cleanup.run_pending();
                callback(&new, previous.as_ref(), &on_cleanup);
                *old.lock() = Some(new);
            } else {
                *old.lock() = previous;
            }
        }
    };

    let (effect, job) = build_watcher(body, job, options.flush, true, &on_cleanup);

    if options.immediate {
        job.run();
    } else {
        effect.run();
        *old.lock() = latest.lock().take();
    }

    WatchHandle { effect }
}

/// Deep-watch a view. The callback runs on every change anywhere inside it.
pub fn watch_observable<C>(view: Value, callback: C, options: WatchOptions) -> WatchHandle
where
    C: Fn(&Value, Option<&Value>, &OnCleanup) + Send + Sync + 'static,
{
    watch(move || view.clone(), callback, options.deep())
}

/// Run `f` now (or after the next flush for [`FlushMode::Post`]) and again
/// whenever what it read changes.
pub fn watch_effect<F>(f: F, options: WatchOptions) -> WatchHandle
where
    F: Fn(&OnCleanup) + Send + Sync + 'static,
{
    let on_cleanup = OnCleanup::default();
    let body = {
        let on_cleanup = on_cleanup.clone();
        move || {
            on_cleanup.run_pending();
            f(&on_cleanup);
        }
    };

    let (effect, job) = build_watcher(
        body,
        |effect: &ReactiveEffect| {
            effect.run();
        },
        options.flush,
        false,
        &on_cleanup,
    );

    if options.flush == FlushMode::Post {
        queue_post_flush_cb(job);
    } else {
        effect.run();
    }

    WatchHandle { effect }
}

/// Read every nested key of `value` so the running effect depends on all of
/// them. Cycles and targets marked raw are skipped.
pub fn traverse(value: &Value) {
    traverse_inner(value, &mut HashSet::new());
}

fn traverse_inner(value: &Value, seen: &mut HashSet<crate::observable::TargetId>) {
    let Some(target) = value.raw_target() else {
        return;
    };
    if target.is_skipped() || !seen.insert(target.id()) {
        return;
    }
    for (_, nested) in value.entries() {
        traverse_inner(&nested, seen);
    }
}
