//! Scheduler jobs.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Body of a job.
pub type JobFn = dyn Fn() + Send + Sync;

/// Ordering and dedup options of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    /// Jobs run in ascending id order; jobs without one run last.
    pub id: Option<u32>,

    /// Runs before non-pre jobs of the same id, and is picked up by
    /// [`flush_pre_flush_cbs`](super::flush_pre_flush_cbs).
    pub pre: bool,

    /// May be queued again while it is running.
    pub allow_recurse: bool,
}

/// A unit of deferred work. Two handles are the same job only if they were
/// cloned from each other.
#[derive(Clone)]
pub struct SchedulerJob {
    inner: Arc<JobInner>,
}

struct JobInner {
    /// Creation order; never reused.
    seq: u64,
    id: Option<u32>,
    pre: bool,
    allow_recurse: AtomicBool,
    active: AtomicBool,
    run: Box<JobFn>,
}

impl SchedulerJob {
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::with_options(run, JobOptions::default())
    }

    pub fn with_options<F>(run: F, options: JobOptions) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

        Self {
            inner: Arc::new(JobInner {
                seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
                id: options.id,
                pre: options.pre,
                allow_recurse: AtomicBool::new(options.allow_recurse),
                active: AtomicBool::new(true),
                run: Box::new(run),
            }),
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.inner.id
    }

    pub fn is_pre(&self) -> bool {
        self.inner.pre
    }

    pub fn allows_recurse(&self) -> bool {
        self.inner.allow_recurse.load(Ordering::Relaxed)
    }

    pub fn set_allow_recurse(&self, allow: bool) {
        self.inner.allow_recurse.store(allow, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Relaxed)
    }

    /// An inactive job stays queued but is skipped by the flush.
    pub fn set_active(&self, active: bool) {
        self.inner.active.store(active, Ordering::Relaxed);
    }

    pub fn run(&self) {
        (self.inner.run)()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Identity key, unique for the life of the process.
    pub(crate) fn key(&self) -> u64 {
        self.inner.seq
    }

    /// Sort id; jobs without an id sort after every id.
    pub(crate) fn sort_id(&self) -> u64 {
        self.inner.id.map_or(u64::MAX, u64::from)
    }
}

/// Flush order: ascending id, `pre` first on equal ids.
pub(crate) fn compare_jobs(a: &SchedulerJob, b: &SchedulerJob) -> CmpOrdering {
    a.sort_id()
        .cmp(&b.sort_id())
        .then_with(|| b.is_pre().cmp(&a.is_pre()))
}

impl PartialEq for SchedulerJob {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for SchedulerJob {}

impl fmt::Debug for SchedulerJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerJob")
            .field("id", &self.inner.id)
            .field("pre", &self.inner.pre)
            .field("allow_recurse", &self.allows_recurse())
            .field("active", &self.is_active())
            .finish()
    }
}
