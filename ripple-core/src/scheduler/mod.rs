//! Scheduler
//!
//! Effects that should not re-run synchronously hand themselves to the
//! scheduler instead. Jobs queued during one tick are deduplicated, ordered
//! and flushed together at the next microtask checkpoint.
//!
//! # Classes of work
//!
//! - **pre jobs** (`JobOptions::pre`): run first among jobs of equal id and
//!   can be forced early with [`flush_pre_flush_cbs`].
//! - **jobs**: the main queue, ordered by id.
//! - **post-flush callbacks**: run once the main queue has drained.
//!
//! State is per thread; each thread has its own queue and checkpoint.

mod job;
mod queue;
mod tick;

pub use job::{JobFn, JobOptions, SchedulerJob};
pub use queue::{
    flush_post_flush_cbs, flush_pre_flush_cbs, invalidate_job, is_flush_pending, is_flushing,
    queue_job, queue_post_flush_cb, queue_post_flush_cbs, queued_jobs, RECURSION_LIMIT,
};
pub use tick::{has_pending_microtasks, next_tick, next_tick_with, queue_microtask, run_microtasks, NextTick};
