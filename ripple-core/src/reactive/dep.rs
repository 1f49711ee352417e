//! Dependency sets.
//!
//! A [`Dep`] answers "who reads this field". Besides its members it keeps two
//! marker words: `w` (tracked in the previous run of the member) and `n`
//! (tracked in the current run). An effect run owns bit `1 << depth`; re-reads
//! of the same field within one run are recognised from `n` alone, and fields
//! that were read last run but not this one are found by `w & !n` when the run
//! finishes.

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::effect::ReactiveEffect;
use super::subscriber::SubscriberId;

/// The set of effects subscribed to one observable field.
#[derive(Clone, Default)]
pub struct Dep {
    inner: Arc<DepInner>,
}

/// Weak handle kept by effects so that dropping a target frees its sets.
pub(crate) type WeakDep = Weak<DepInner>;

#[derive(Default)]
pub(crate) struct DepInner {
    state: Mutex<DepState>,
}

#[derive(Default)]
struct DepState {
    subscribers: IndexMap<SubscriberId, ReactiveEffect>,
    /// Was tracked, one bit per run depth.
    w: u32,
    /// Newly tracked, one bit per run depth.
    n: u32,
}

impl Dep {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.inner.state.lock().subscribers.contains_key(&id)
    }

    /// Snapshot of the current members.
    pub fn subscribers(&self) -> Vec<ReactiveEffect> {
        self.inner.state.lock().subscribers.values().cloned().collect()
    }

    pub(crate) fn downgrade(&self) -> WeakDep {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &WeakDep) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn add(&self, effect: &ReactiveEffect) {
        self.inner
            .state
            .lock()
            .subscribers
            .insert(effect.id(), effect.clone());
    }

    pub(crate) fn remove(&self, id: SubscriberId) {
        let removed = self.inner.state.lock().subscribers.shift_remove(&id);
        drop(removed);
    }

    /// Records a read in the run owning `bit`.
    ///
    /// Returns true when the reader must be added as a member: first read of
    /// this run and not already a member from the previous run.
    pub(crate) fn mark_tracked(&self, bit: u32) -> bool {
        let mut state = self.inner.state.lock();
        if state.n & bit != 0 {
            return false;
        }
        state.n |= bit;
        state.w & bit == 0
    }

    /// Start of a run: every set the effect belongs to was tracked before.
    pub(crate) fn mark_was_tracked(&self, bit: u32) {
        self.inner.state.lock().w |= bit;
    }

    /// End of a run: drops `id` if it read this field last run but not this
    /// one, and clears the run's bits. Returns whether `id` is still a member.
    pub(crate) fn finalize(&self, id: SubscriberId, bit: u32) -> bool {
        let removed = {
            let mut state = self.inner.state.lock();
            let stale = state.w & bit != 0 && state.n & bit == 0;
            state.w &= !bit;
            state.n &= !bit;
            if !stale {
                return true;
            }
            state.subscribers.shift_remove(&id)
        };
        drop(removed);
        false
    }

    #[cfg(test)]
    fn bits(&self) -> (u32, u32) {
        let state = self.inner.state.lock();
        (state.w, state.n)
    }
}

impl PartialEq for Dep {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Dep {}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, n, len) = {
            let state = self.inner.state.lock();
            (state.w, state.n, state.subscribers.len())
        };
        f.debug_struct("Dep")
            .field("subscribers", &len)
            .field("w", &w)
            .field("n", &n)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_appears_once() {
        let dep = Dep::new();
        let effect = ReactiveEffect::new(|| {});

        dep.add(&effect);
        dep.add(&effect);

        assert_eq!(dep.len(), 1);
        assert!(dep.contains(effect.id()));

        dep.remove(effect.id());
        assert!(dep.is_empty());
    }

    #[test]
    fn repeated_reads_in_one_run_track_once() {
        let dep = Dep::new();

        assert!(dep.mark_tracked(2));
        assert!(!dep.mark_tracked(2));
        assert_eq!(dep.bits(), (0, 2));
    }

    #[test]
    fn previously_tracked_reads_are_not_re_added() {
        let dep = Dep::new();
        dep.mark_was_tracked(2);

        assert!(!dep.mark_tracked(2));
        assert_eq!(dep.bits(), (2, 2));
    }

    #[test]
    fn finalize_prunes_stale_members() {
        let dep = Dep::new();
        let effect = ReactiveEffect::new(|| {});
        dep.add(&effect);

        // tracked last run, not this run
        dep.mark_was_tracked(2);
        assert!(!dep.finalize(effect.id(), 2));
        assert!(dep.is_empty());
        assert_eq!(dep.bits(), (0, 0));
    }

    #[test]
    fn finalize_keeps_members_read_again() {
        let dep = Dep::new();
        let effect = ReactiveEffect::new(|| {});
        dep.add(&effect);

        dep.mark_was_tracked(2);
        dep.mark_tracked(2);
        assert!(dep.finalize(effect.id(), 2));
        assert_eq!(dep.len(), 1);
        assert_eq!(dep.bits(), (0, 0));
    }
}
