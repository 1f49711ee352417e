//! Computed Implementation
//!
//! A [`Computed`] is a cached derived value that re-evaluates only when one of
//! its dependencies changes, and only when someone reads it.
//!
//! # How Computed Cells Work
//!
//! 1. The getter runs inside a dedicated effect flagged as computed. Nothing
//!    runs on creation; the cell starts dirty.
//!
//! 2. Reading `.get()` subscribes the reader to the cell's own dependency set
//!    and, if the cell is dirty, runs the getter and marks it clean.
//!
//! 3. When a dependency of the getter changes, the effect's scheduler does
//!    not recompute. It marks the cell dirty and notifies the cell's own
//!    subscribers, which pull a fresh value on their next read.
//!
//! # Why This Matters
//!
//! Cells nobody reads stay dirty and cost nothing, and a getter whose inputs
//! change several times between two reads recomputes once.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::trace;

use super::context;
use super::debug::EventInfo;
use super::dep::Dep;
use super::effect::ReactiveEffect;
use super::refs::RefValue;
use super::runtime::{track_effects, trigger_dep, TrackOp, TriggerOp};
use crate::observable::PropKey;

type Setter<T> = Box<dyn Fn(T) + Send + Sync>;

/// Cache state of a computed cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputedState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency changed since the last evaluation.
    Dirty,
}

/// A lazily evaluated, cached derived value.
pub struct Computed<T: RefValue> {
    inner: Arc<ComputedInner<T>>,
}

struct ComputedInner<T> {
    effect: ReactiveEffect,
    value: Arc<RwLock<Option<T>>>,
    dirty: Arc<AtomicBool>,
    cacheable: bool,
    setter: Option<Setter<T>>,
    dep: Arc<OnceLock<Dep>>,
}

impl<T: RefValue> Computed<T> {
    /// A getter-only cell. Writes are ignored.
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(getter, None, true)
    }

    /// A cell whose writes are forwarded to `setter`.
    pub fn writable<F, S>(getter: F, setter: S) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        S: Fn(T) + Send + Sync + 'static,
    {
        Self::build(getter, Some(Box::new(setter)), true)
    }

    /// A cell that recomputes on every read and tracks nothing, for one-off
    /// evaluation outside any interactive session.
    pub fn uncached<F>(getter: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(getter, None, false)
    }

    fn build<F>(getter: F, setter: Option<Setter<T>>, cacheable: bool) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let value: Arc<RwLock<Option<T>>> = Arc::new(RwLock::new(None));
        let dirty = Arc::new(AtomicBool::new(true));
        let dep: Arc<OnceLock<Dep>> = Arc::new(OnceLock::new());

        let body = {
            let value = value.clone();
            move || {
                let next = getter();
                *value.write() = Some(next);
            }
        };

        // flips to dirty and tells readers; the next read recomputes
        let scheduler = {
            let dirty = dirty.clone();
            let dep = dep.clone();
            move || {
                if !dirty.swap(true, Ordering::SeqCst) {
                    if let Some(dep) = dep.get() {
                        let info = EventInfo::trigger(None, TriggerOp::Set, Some(PropKey::from("value")));
                        trigger_dep(dep, Some(&info));
                    }
                }
            }
        };

        let effect = ReactiveEffect::build(Box::new(body), Some(Arc::new(scheduler)), true, None);
        if !cacheable {
            effect.deactivate();
        }

        Self {
            inner: Arc::new(ComputedInner {
                effect,
                value,
                dirty,
                cacheable,
                setter,
                dep,
            }),
        }
    }

    /// Read the value, recomputing if dirty.
    ///
    /// # Panics
    ///
    /// Panics if the getter panics, or if the getter reads its own cell
    /// before it ever produced a value. See [`try_get`](Self::try_get).
    pub fn get(&self) -> T {
        match self.try_get() {
            Some(value) => value,
            None => panic!("computed cell read from inside its own first evaluation"),
        }
    }

    /// Read the value, recomputing if dirty. `None` only while the getter is
    /// reading its own cell and no earlier run produced a value.
    ///
    /// A getter that panics leaves the cell dirty, so the next read runs it
    /// again.
    pub fn try_get(&self) -> Option<T> {
        self.track();

        let inner = &self.inner;
        if inner.dirty.load(Ordering::SeqCst) || !inner.cacheable {
            inner.dirty.store(false, Ordering::SeqCst);
            trace!(effect = %inner.effect.id(), "computed re-evaluated");

            let mut rerun = DirtyUnlessFinished {
                dirty: &inner.dirty,
                finished: false,
            };
            rerun.finished = inner.effect.run();
        }

        inner.value.read().clone()
    }

    /// Forward `value` to the setter. Getter-only cells ignore writes.
    pub fn set(&self, value: T) {
        match &self.inner.setter {
            Some(setter) => setter(value),
            None => trace!(effect = %self.inner.effect.id(), "write to getter-only computed ignored"),
        }
    }

    pub fn state(&self) -> ComputedState {
        if self.inner.dirty.load(Ordering::SeqCst) {
            ComputedState::Dirty
        } else {
            ComputedState::Clean
        }
    }

    pub fn is_writable(&self) -> bool {
        self.inner.setter.is_some()
    }

    /// The getter's effect; stopping it freezes the cell.
    pub fn effect(&self) -> &ReactiveEffect {
        &self.inner.effect
    }

    fn track(&self) {
        if !context::is_tracking() {
            return;
        }
        let dep = self.inner.dep.get_or_init(Dep::new);
        let info = EventInfo::track(None, TrackOp::Get, Some(PropKey::from("value")));
        track_effects(dep, Some(&info));
    }
}

/// Puts the cell back to dirty when a run panics or is refused.
struct DirtyUnlessFinished<'a> {
    dirty: &'a AtomicBool,
    finished: bool,
}

impl Drop for DirtyUnlessFinished<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.dirty.store(true, Ordering::SeqCst);
        }
    }
}

impl<T: RefValue> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: RefValue + fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("value", &*self.inner.value.read())
            .field("state", &self.state())
            .finish()
    }
}
