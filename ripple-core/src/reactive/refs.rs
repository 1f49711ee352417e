//! Ref Implementation
//!
//! A [`Ref`] is a single reactive value. Reading it inside an effect
//! subscribes the effect; writing a different value notifies subscribers.
//!
//! # Change Detection
//!
//! Each ref keeps the raw form of its value next to the value it hands out.
//! A write is compared against the raw form with [`RefValue::same_value`],
//! so assigning an equal value is a no-op.
//!
//! Deep refs holding a structure [`Value`] hand out its reactive view and
//! store the raw target; shallow refs store whatever they are given.

use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use super::context;
use super::debug::EventInfo;
use super::dep::Dep;
use super::runtime::{track_effects, trigger_dep, TrackOp, TriggerOp};
use crate::observable::{self, same_number, PropKey, Value};

/// Types that can live in a [`Ref`] or be produced by a computed cell.
pub trait RefValue: Clone + Send + Sync + 'static {
    /// Whether `self` is equal to `other` for change detection.
    fn same_value(&self, other: &Self) -> bool;

    /// The raw form compared on writes.
    fn to_raw(&self) -> Self {
        self.clone()
    }

    /// The form a deep ref hands out.
    fn to_reactive(self) -> Self {
        self
    }

    /// Values stored as given even by deep refs.
    fn is_direct(&self) -> bool {
        false
    }

    /// Read every nested part so that the running effect depends on all of
    /// it. Only structures have anything to read.
    fn traverse(&self) {}
}

macro_rules! impl_ref_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl RefValue for $ty {
                fn same_value(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

impl_ref_value!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    String,
    &'static str,
    Arc<str>,
);

impl RefValue for f64 {
    fn same_value(&self, other: &Self) -> bool {
        same_number(*self, *other)
    }
}

impl RefValue for f32 {
    fn same_value(&self, other: &Self) -> bool {
        same_number(f64::from(*self), f64::from(*other))
    }
}

impl<T: RefValue> RefValue for Option<T> {
    fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same_value(b),
            (None, None) => true,
            _ => false,
        }
    }

    fn traverse(&self) {
        if let Some(value) = self {
            value.traverse();
        }
    }
}

impl<T: RefValue> RefValue for Vec<T> {
    fn same_value(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.same_value(b))
    }

    fn traverse(&self) {
        self.iter().for_each(RefValue::traverse);
    }
}

impl RefValue for Value {
    fn same_value(&self, other: &Self) -> bool {
        self == other
    }

    fn to_raw(&self) -> Self {
        observable::to_raw(self)
    }

    fn to_reactive(self) -> Self {
        observable::to_reactive(self)
    }

    fn is_direct(&self) -> bool {
        observable::is_shallow(self) || observable::is_readonly(self)
    }

    fn traverse(&self) {
        super::watch::traverse(self);
    }
}

/// A single reactive value. Cloning yields another handle to the same cell.
pub struct Ref<T: RefValue> {
    inner: Arc<RefInner<T>>,
}

struct RefInner<T> {
    slot: RwLock<RefSlot<T>>,
    shallow: bool,
    dep: OnceLock<Dep>,
}

struct RefSlot<T> {
    value: T,
    raw: T,
}

impl<T: RefValue> Ref<T> {
    /// Create a deep ref.
    pub fn new(value: T) -> Self {
        let raw = value.to_raw();
        let value = value.to_reactive();
        Self::build(value, raw, false)
    }

    /// Create a ref that stores its value as given and only notifies on
    /// assignment.
    pub fn shallow(value: T) -> Self {
        Self::build(value.clone(), value, true)
    }

    fn build(value: T, raw: T, shallow: bool) -> Self {
        Self {
            inner: Arc::new(RefInner {
                slot: RwLock::new(RefSlot { value, raw }),
                shallow,
                dep: OnceLock::new(),
            }),
        }
    }

    pub fn is_shallow(&self) -> bool {
        self.inner.shallow
    }

    /// Read the value, subscribing the running effect.
    pub fn get(&self) -> T {
        self.track();
        self.get_untracked()
    }

    pub fn get_untracked(&self) -> T {
        self.inner.slot.read().value.clone()
    }

    /// Run `f` on the value, subscribing the running effect. `f` sees a
    /// snapshot and may write to this ref.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        let value = self.get_untracked();
        f(&value)
    }

    /// Assign `value`; subscribers run only if it differs from the current
    /// raw value.
    pub fn set(&self, value: T) {
        let direct = self.inner.shallow || value.is_direct();
        let raw = if direct { value.clone() } else { value.to_raw() };

        {
            let mut slot = self.inner.slot.write();
            if raw.same_value(&slot.raw) {
                return;
            }
            slot.value = if direct { value } else { value.to_reactive() };
            slot.raw = raw;
        }

        self.trigger();
    }

    /// Assign a value computed from the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let current = self.get_untracked();
        self.set(f(&current));
    }

    /// Number of effects reading this ref.
    pub fn subscriber_count(&self) -> usize {
        self.inner.dep.get().map_or(0, Dep::len)
    }

    fn track(&self) {
        if !context::is_tracking() {
            return;
        }
        let dep = self.inner.dep.get_or_init(Dep::new);
        let info = EventInfo::track(None, TrackOp::Get, Some(PropKey::from("value")));
        track_effects(dep, Some(&info));
    }

    fn trigger(&self) {
        if let Some(dep) = self.inner.dep.get() {
            let info = EventInfo::trigger(None, TriggerOp::Set, Some(PropKey::from("value")));
            trigger_dep(dep, Some(&info));
        }
    }
}

impl<T: RefValue> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: RefValue + fmt::Debug> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("value", &self.inner.slot.read().value)
            .field("shallow", &self.inner.shallow)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Notify the subscribers of `r` without changing it. Used after mutating
/// the inside of a shallow ref's value.
pub fn trigger_ref<T: RefValue>(r: &Ref<T>) {
    r.trigger();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observable::{is_reactive, Target};
    use crate::reactive::effect::effect;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn ref_get_and_set() {
        let count = Ref::new(0);
        assert_eq!(count.get(), 0);

        count.set(5);
        assert_eq!(count.get(), 5);
    }

    #[test]
    fn writes_from_inside_with_and_update() {
        let count = Ref::new(1);

        let seen = count.with(|value| {
            count.set(value + 1);
            *value
        });
        assert_eq!(seen, 1);
        assert_eq!(count.get(), 2);

        count.update(|value| {
            assert_eq!(count.get_untracked(), *value);
            value * 10
        });
        assert_eq!(count.get(), 20);
    }

    #[test]
    fn equal_assignment_notifies_once() {
        let value = Ref::new(1);
        let runs = Arc::new(AtomicI32::new(0));

        let _effect = effect({
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
        assert_eq!(value.subscriber_count(), 1);
    }

    #[test]
    fn ref_update() {
        let count = Ref::new(10);
        count.update(|n| n + 5);
        assert_eq!(count.get(), 15);
    }

    #[test]
    fn float_refs_use_same_value() {
        let value = Ref::new(f64::NAN);
        let runs = Arc::new(AtomicI32::new(0));

        let _effect = effect({
            let value = value.clone();
            let runs = runs.clone();
            move || {
                value.get();
                runs.fetch_add(1, Ordering::SeqCst);
            }
        });

        value.set(f64::NAN);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        value.set(-0.0);
        value.set(0.0);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn deep_ref_wraps_structures() {
        let raw = Value::from(Target::object());
        let deep = Ref::new(raw.clone());
        let shallow = Ref::shallow(raw.clone());

        assert!(is_reactive(&deep.get()));
        assert_eq!(shallow.get(), raw);

        // assigning the view back is not a change
        let runs = Arc::new(AtomicI32::new(0));
        let _effect = effect({
            let deep = deep.clone();
            let runs = runs.clone();
            move || {
                deep.get();
                runs.fetch_add(1, Ordering::SeqCst);
            }
        });
        deep.set(deep.get_untracked());
        deep.set(raw);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn trigger_ref_forces_notification() {
        let list = Ref::shallow(vec![1]);
        let runs = Arc::new(AtomicI32::new(0));

        let _effect = effect({
            let list = list.clone();
            let runs = runs.clone();
            move || {
                list.with(|items| items.len());
                runs.fetch_add(1, Ordering::SeqCst);
            }
        });

        trigger_ref(&list);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reads_outside_effects_create_no_dep() {
        let value = Ref::new(1);
        value.get();
        assert_eq!(value.subscriber_count(), 0);
    }
}
