//! Job Queue
//!
//! Batches the work triggered during one tick and runs it at the next
//! microtask checkpoint.
//!
//! # Algorithm
//!
//! 1. `queue_job` inserts a job by ascending id unless the same job is
//!    already waiting at or after the flush cursor. The first job queued in a
//!    tick schedules the flush as a microtask.
//!
//! 2. `flush_jobs` sorts the queue (id ascending, `pre` first on equal ids)
//!    and walks it with a cursor, so jobs queued during the flush run in the
//!    same pass. Inactive jobs are skipped.
//!
//! 3. Afterwards the post-flush callbacks run, sorted by id. If either queue
//!    gained work meanwhile, the flush repeats until both are empty.
//!
//! A job that panics does not stop the cleanup: the cursor is reset, the
//! queue cleared, post-flush callbacks drained and remaining work flushed
//! before the panic resumes.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::mem;
use std::panic::{self, AssertUnwindSafe};

use indexmap::IndexMap;
use tracing::{debug, error};

use super::job::{compare_jobs, SchedulerJob};
use super::tick;

/// Times one job may run within one flush before it is considered an
/// endless update loop.
pub const RECURSION_LIMIT: u32 = 100;

thread_local! {
    static SCHEDULER: RefCell<SchedulerState> = RefCell::new(SchedulerState::default());
}

#[derive(Default)]
struct SchedulerState {
    queue: Vec<SchedulerJob>,
    flush_index: usize,
    pending_post: Vec<SchedulerJob>,
    active_post: Option<Vec<SchedulerJob>>,
    post_flush_index: usize,
    is_flushing: bool,
    is_flush_pending: bool,
}

/// Run counts per job within one flush.
type Seen = HashMap<u64, u32>;

fn with_state<R>(f: impl FnOnce(&mut SchedulerState) -> R) -> R {
    SCHEDULER.with(|state| f(&mut state.borrow_mut()))
}

pub fn is_flushing() -> bool {
    with_state(|state| state.is_flushing)
}

pub fn is_flush_pending() -> bool {
    with_state(|state| state.is_flush_pending)
}

/// Number of jobs in the main queue.
pub fn queued_jobs() -> usize {
    with_state(|state| state.queue.len())
}

/// Queue `job` for the next flush.
pub fn queue_job(job: SchedulerJob) {
    let inserted = with_state(|state| {
        let start = if state.is_flushing && job.allows_recurse() {
            state.flush_index + 1
        } else {
            state.flush_index
        };
        if state.queue.iter().skip(start).any(|queued| queued.ptr_eq(&job)) {
            return false;
        }

        match job.id() {
            None => state.queue.push(job),
            Some(id) => {
                let index = find_insertion_index(state, id);
                state.queue.insert(index, job);
            }
        }
        true
    });

    if inserted {
        queue_flush();
    }
}

/// First position after the cursor whose job id is not below `id`.
fn find_insertion_index(state: &SchedulerState, id: u32) -> usize {
    let id = u64::from(id);
    let mut start = (state.flush_index + 1).min(state.queue.len());
    let mut end = state.queue.len();
    while start < end {
        let middle = (start + end) / 2;
        if state.queue[middle].sort_id() < id {
            start = middle + 1;
        } else {
            end = middle;
        }
    }
    start
}

fn queue_flush() {
    let schedule = with_state(|state| {
        if state.is_flushing || state.is_flush_pending {
            return false;
        }
        state.is_flush_pending = true;
        true
    });
    if schedule {
        tick::queue_microtask(flush_jobs);
    }
}

/// Remove `job` from the queue if it has not run yet.
pub fn invalidate_job(job: &SchedulerJob) {
    let removed = with_state(|state| {
        let index = state.queue.iter().position(|queued| queued.ptr_eq(job))?;
        let not_yet_run = !state.is_flushing || index > state.flush_index;
        not_yet_run.then(|| state.queue.remove(index))
    });
    drop(removed);
}

/// Queue `job` to run after the main queue of the next flush.
pub fn queue_post_flush_cb(job: SchedulerJob) {
    with_state(|state| {
        let start = if job.allows_recurse() {
            state.post_flush_index + 1
        } else {
            state.post_flush_index
        };
        let running = state
            .active_post
            .as_ref()
            .is_some_and(|active| active.iter().skip(start).any(|queued| queued.ptr_eq(&job)));
        if !running {
            state.pending_post.push(job);
        }
    });
    queue_flush();
}

/// Queue several post-flush callbacks without dedup against the running
/// batch.
pub fn queue_post_flush_cbs(jobs: impl IntoIterator<Item = SchedulerJob>) {
    with_state(|state| state.pending_post.extend(jobs));
    queue_flush();
}

/// Run queued `pre` jobs now, in queue order, removing them from the queue.
///
/// During a flush only jobs after the running one are considered.
pub fn flush_pre_flush_cbs() {
    let mut index = with_state(|state| {
        if state.is_flushing {
            state.flush_index + 1
        } else {
            0
        }
    });

    loop {
        let next = with_state(|state| {
            while index < state.queue.len() {
                if state.queue[index].is_pre() {
                    return Some(state.queue.remove(index));
                }
                index += 1;
            }
            None
        });
        let Some(job) = next else { break };
        if job.is_active() {
            job.run();
        }
    }
}

/// Run the pending post-flush callbacks now.
pub fn flush_post_flush_cbs() {
    flush_post_flush_cbs_with(&mut Seen::new());
}

fn flush_post_flush_cbs_with(seen: &mut Seen) {
    let started = with_state(|state| {
        if state.pending_post.is_empty() {
            return false;
        }

        let deduped: IndexMap<u64, SchedulerJob> = state
            .pending_post
            .drain(..)
            .map(|job| (job.key(), job))
            .collect();
        let mut batch: Vec<_> = deduped.into_values().collect();

        // already draining: append to the running batch
        if let Some(active) = &mut state.active_post {
            active.extend(batch);
            return false;
        }

        batch.sort_by_key(SchedulerJob::sort_id);
        state.active_post = Some(batch);
        true
    });
    if !started {
        return;
    }

    struct Reset;

    impl Drop for Reset {
        fn drop(&mut self) {
            let finished = with_state(|state| {
                state.post_flush_index = 0;
                state.active_post.take()
            });
            drop(finished);
        }
    }

    let _reset = Reset;
    let mut index = 0;
    loop {
        let job = with_state(|state| {
            state.post_flush_index = index;
            state.active_post.as_ref().and_then(|active| active.get(index).cloned())
        });
        let Some(job) = job else { break };
        if job.is_active() && !check_recursive_updates(seen, &job) {
            job.run();
        }
        index += 1;
    }
}

fn check_recursive_updates(seen: &mut Seen, job: &SchedulerJob) -> bool {
    let count = seen.entry(job.key()).or_insert(0);
    if *count > RECURSION_LIMIT {
        error!(
            job = ?job,
            limit = RECURSION_LIMIT,
            "maximum recursive updates exceeded; the job keeps re-triggering itself"
        );
        return true;
    }
    *count += 1;
    false
}

fn run_queue(seen: &mut Seen) {
    let mut index = 0;
    loop {
        let job = with_state(|state| {
            state.flush_index = index;
            state.queue.get(index).cloned()
        });
        let Some(job) = job else { break };
        if job.is_active() && !check_recursive_updates(seen, &job) {
            job.run();
        }
        index += 1;
    }
}

fn flush_jobs() {
    let mut seen = Seen::new();
    let mut first_panic: Option<Box<dyn Any + Send>> = None;

    loop {
        let queued = with_state(|state| {
            state.is_flush_pending = false;
            state.is_flushing = true;
            state.queue.sort_by(compare_jobs);
            state.queue.len()
        });
        debug!(jobs = queued, "flushing jobs");

        let result = panic::catch_unwind(AssertUnwindSafe(|| run_queue(&mut seen)));

        let finished = with_state(|state| {
            state.flush_index = 0;
            mem::take(&mut state.queue)
        });
        drop(finished);

        let post = panic::catch_unwind(AssertUnwindSafe(|| flush_post_flush_cbs_with(&mut seen)));

        let more = with_state(|state| {
            state.is_flushing = false;
            !state.queue.is_empty() || !state.pending_post.is_empty()
        });

        for outcome in [result, post] {
            if let Err(payload) = outcome {
                first_panic.get_or_insert(payload);
            }
        }

        if !more {
            break;
        }
    }

    if let Some(payload) = first_panic {
        panic::resume_unwind(payload);
    }
}
