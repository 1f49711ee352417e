//! Observable views.
//!
//! An [`Observable`] stands in front of a raw [`Target`] and intercepts every
//! structural operation on it. Reads record a dependency on the running
//! effect and wrap nested structures on the way out; writes compare against
//! the previous value and notify subscribers when something actually changed.
//!
//! # Modes
//!
//! | mode               | tracks | writes   | nested reads        |
//! |--------------------|--------|----------|---------------------|
//! | `Reactive`         | yes    | trigger  | wrapped reactive    |
//! | `ShallowReactive`  | yes    | trigger  | returned as stored  |
//! | `Readonly`         | no     | rejected | wrapped readonly    |
//! | `ShallowReadonly`  | no     | rejected | returned as stored  |
//!
//! A readonly view created over a reactive view keeps that view as its base
//! and reads through it, so it still tracks.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::key::{flags, PropKey};
use super::target::{Target, TargetKind};
use super::value::Value;
use crate::error::{ReactiveError, Result};
use crate::reactive::context;
use crate::reactive::runtime::{track, trigger, TrackOp, TriggerOp};

/// How a view treats the target behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyMode {
    Reactive,
    ShallowReactive,
    Readonly,
    ShallowReadonly,
}

impl ProxyMode {
    pub fn is_readonly(&self) -> bool {
        matches!(self, Self::Readonly | Self::ShallowReadonly)
    }

    pub fn is_shallow(&self) -> bool {
        matches!(self, Self::ShallowReactive | Self::ShallowReadonly)
    }
}

/// An intercepting view of a raw target.
///
/// Views are canonical: wrapping the same target in the same mode yields
/// the same view as long as any handle to it is alive, so `==` on views is
/// identity.
#[derive(Clone)]
pub struct Observable {
    inner: Arc<ObservableInner>,
}

pub(crate) struct ObservableInner {
    target: Target,
    mode: ProxyMode,
    base: Option<Observable>,
}

impl Observable {
    pub(crate) fn new(target: Target, mode: ProxyMode, base: Option<Observable>) -> Self {
        Self {
            inner: Arc::new(ObservableInner { target, mode, base }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ObservableInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<ObservableInner> {
        Arc::downgrade(&self.inner)
    }

    /// The raw target behind this view (and behind its base, if any).
    pub fn target(&self) -> &Target {
        &self.inner.target
    }

    pub fn mode(&self) -> ProxyMode {
        self.inner.mode
    }

    /// The reactive view a readonly view was created over.
    pub fn base(&self) -> Option<&Observable> {
        self.inner.base.as_ref()
    }

    pub fn is_readonly(&self) -> bool {
        self.inner.mode.is_readonly()
    }

    pub fn is_shallow(&self) -> bool {
        self.inner.mode.is_shallow()
    }

    /// Whether writes through this view (or its base) are observed.
    pub fn is_reactive(&self) -> bool {
        match &self.inner.base {
            Some(base) => base.is_reactive(),
            None => !self.is_readonly(),
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Read `key`, tracking it unless the view is readonly.
    pub fn get(&self, key: impl Into<PropKey>) -> Value {
        let key = key.into();
        if let Some(flag) = key.flag() {
            return self.flag_value(flag);
        }

        if let Some(base) = &self.inner.base {
            let value = base.get(key);
            return self.wrap_nested(value);
        }

        let target = &self.inner.target;
        let value = target.get(&key).unwrap_or_default();
        if key.is_non_trackable() {
            return value;
        }

        if !self.is_readonly() {
            track(target, TrackOp::Get, &key);
        }
        self.wrap_nested(value)
    }

    fn flag_value(&self, flag: &str) -> Value {
        match flag {
            flags::IS_REACTIVE => Value::Bool(self.is_reactive()),
            flags::IS_READONLY => Value::Bool(self.is_readonly()),
            flags::IS_SHALLOW => Value::Bool(self.is_shallow()),
            flags::SKIP => Value::Bool(self.inner.target.is_skipped()),
            flags::RAW => Value::Target(self.inner.target.clone()),
            _ => Value::Null,
        }
    }

    /// Nested structures leave a deep view wrapped in the view's own mode.
    fn wrap_nested(&self, value: Value) -> Value {
        if self.is_shallow() || !value.is_structure() {
            return value;
        }
        if self.is_readonly() {
            super::readonly(value)
        } else {
            super::reactive(value)
        }
    }

    pub fn has(&self, key: impl Into<PropKey>) -> bool {
        let key = key.into();
        if let Some(base) = &self.inner.base {
            return base.has(key);
        }

        let target = &self.inner.target;
        let result = target.has(&key);
        if !self.is_readonly() && !key.is_non_trackable() {
            track(target, TrackOp::Has, &key);
        }
        result
    }

    /// Track whatever enumeration of this target depends on.
    fn track_iteration(&self) {
        if self.is_readonly() {
            return;
        }
        let target = &self.inner.target;
        match target.kind() {
            TargetKind::Array => track(target, TrackOp::Iterate, &PropKey::length()),
            TargetKind::Map => track(target, TrackOp::Iterate, &PropKey::MapKeyIterate),
            TargetKind::Object => track(target, TrackOp::Iterate, &PropKey::Iterate),
        }
    }

    /// Own keys; subscribes to additions and deletions.
    pub fn own_keys(&self) -> Vec<PropKey> {
        if let Some(base) = &self.inner.base {
            return base.own_keys();
        }
        self.track_iteration();
        self.inner.target.own_keys()
    }

    /// Same as [`own_keys`](Self::own_keys).
    pub fn keys(&self) -> Vec<PropKey> {
        self.own_keys()
    }

    /// Array length or number of entries.
    pub fn len(&self) -> usize {
        if let Some(base) = &self.inner.base {
            return base.len();
        }

        let target = &self.inner.target;
        if !self.is_readonly() {
            match target.kind() {
                TargetKind::Array => track(target, TrackOp::Get, &PropKey::length()),
                _ => track(target, TrackOp::Iterate, &PropKey::Iterate),
            }
        }
        target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries().into_iter().map(|(_, value)| value).collect()
    }

    /// Key/value pairs. Maps subscribe to any change of their entries;
    /// objects and arrays subscribe per key, as reading each one would.
    pub fn entries(&self) -> Vec<(PropKey, Value)> {
        if let Some(base) = &self.inner.base {
            return base
                .entries()
                .into_iter()
                .map(|(key, value)| (key, self.wrap_nested(value)))
                .collect();
        }

        let target = &self.inner.target;
        if target.kind() == TargetKind::Map {
            if !self.is_readonly() {
                track(target, TrackOp::Iterate, &PropKey::Iterate);
            }
            return target
                .entries()
                .into_iter()
                .map(|(key, value)| (key, self.wrap_nested(value)))
                .collect();
        }

        self.own_keys()
            .into_iter()
            .map(|key| {
                let value = self.get(key.clone());
                (key, value)
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    fn reject(&self, op: &'static str, key: PropKey) -> ReactiveError {
        warn!(target_id = %self.inner.target.id(), key = %key, op, "write to readonly target rejected");
        ReactiveError::Readonly { op, key }
    }

    /// Write `key`, notifying subscribers on add or change.
    pub fn set(&self, key: impl Into<PropKey>, value: impl Into<Value>) -> Result<()> {
        let target = self.inner.target.clone();
        self.set_with_receiver(&key.into(), value.into(), &target)
    }

    /// Write `key` on behalf of `receiver`. Only a write whose receiver is
    /// this view's own target notifies.
    pub(crate) fn set_with_receiver(&self, key: &PropKey, value: Value, receiver: &Target) -> Result<()> {
        if self.is_readonly() {
            return Err(self.reject("set", key.clone()));
        }

        let target = &self.inner.target;
        let mut old = target.get_own(key);
        let mut value = value;
        if !self.is_shallow() && !super::is_shallow(&value) && !super::is_readonly(&value) {
            old = old.map(|old| super::to_raw(&old));
            value = super::to_raw(&value);
        }

        let had_key = match (target.kind(), key) {
            (TargetKind::Array, PropKey::Index(index)) => *index < target.len(),
            _ => target.has_own(key),
        };

        target.set_with_receiver(key, value.clone(), receiver)?;

        if target.ptr_eq(receiver) {
            if !had_key {
                trigger(target, TriggerOp::Add, Some(key), Some(&value));
            } else if old.as_ref() != Some(&value) {
                trigger(target, TriggerOp::Set, Some(key), Some(&value));
            }
        }
        Ok(())
    }

    /// Remove `key`. Returns whether it was present.
    pub fn delete(&self, key: impl Into<PropKey>) -> Result<bool> {
        let key = key.into();
        if self.is_readonly() {
            return Err(self.reject("delete", key));
        }

        let target = &self.inner.target;
        let had_key = target.has_own(&key);
        let deleted = target.delete(&key);
        if had_key && deleted {
            trigger(target, TriggerOp::Delete, Some(&key), None);
        }
        Ok(deleted)
    }

    /// Remove every entry, notifying every subscriber of the target.
    pub fn clear(&self) -> Result<()> {
        if self.is_readonly() {
            return Err(self.reject("clear", PropKey::Iterate));
        }

        let target = &self.inner.target;
        if target.clear() {
            trigger(target, TriggerOp::Clear, None, None);
        }
        Ok(())
    }

    fn ensure_array(&self, op: &'static str) -> Result<()> {
        if self.is_readonly() {
            return Err(self.reject(op, PropKey::length()));
        }
        match self.inner.target.kind() {
            TargetKind::Array => Ok(()),
            kind => Err(ReactiveError::Unsupported {
                op,
                kind: kind.as_str(),
            }),
        }
    }

    /// Append to an array. Returns the new length.
    ///
    /// Runs untracked: the length read here must not subscribe the running
    /// effect, or an effect pushing to an array it watches would loop.
    pub fn push(&self, value: impl Into<Value>) -> Result<usize> {
        self.ensure_array("push")?;
        let value = value.into();
        context::untracked(|| {
            let length = self.inner.target.len();
            self.set(length, value)?;
            Ok(length + 1)
        })
    }

    /// Remove and return the last element; `Null` when empty. Untracked like
    /// [`push`](Self::push).
    pub fn pop(&self) -> Result<Value> {
        self.ensure_array("pop")?;
        context::untracked(|| {
            let Some(last) = self.inner.target.len().checked_sub(1) else {
                return Ok(Value::Null);
            };
            let value = self.get(last);
            self.set(PropKey::length(), last)?;
            Ok(value)
        })
    }
}

impl PartialEq for Observable {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Observable {}

impl fmt::Debug for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("target", &self.inner.target.id())
            .field("mode", &self.inner.mode)
            .field("layered", &self.inner.base.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observable::{reactive, readonly, shallow_reactive};
    use crate::reactive::effect::effect;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn counter() -> Arc<AtomicI32> {
        Arc::new(AtomicI32::new(0))
    }

    #[test]
    fn reads_track_and_writes_trigger() {
        let state = reactive(Target::from_props([("num", 0)]));
        let seen = counter();

        let _effect = effect({
            let state = state.clone();
            let seen = seen.clone();
            move || {
                let num = state.get("num").as_i64().unwrap_or(-1);
                seen.store(num as i32, Ordering::SeqCst);
            }
        });
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        state.set("num", 7).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn equal_writes_do_not_trigger() {
        let state = reactive(Target::from_props([("n", f64::NAN)]));
        let runs = counter();

        let _effect = effect({
            let state = state.clone();
            let runs = runs.clone();
            move || {
                state.get("n");
                runs.fetch_add(1, Ordering::SeqCst);
            }
        });

        state.set("n", f64::NAN).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        state.set("n", 2).unwrap();
        state.set("n", 2).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn nested_reads_are_wrapped() {
        let state = reactive(Target::from_props([("inner", Target::from_props([("a", 1)]))]));

        let inner = state.get("inner");
        assert!(crate::observable::is_reactive(&inner));
        assert_eq!(inner, state.get("inner"));

        let shallow = shallow_reactive(Target::from_props([("inner", Target::object())]));
        assert!(!crate::observable::is_proxy(&shallow.get("inner")));
    }

    #[test]
    fn readonly_rejects_writes() {
        let view = readonly(Target::from_props([("a", 1)]));

        assert!(matches!(
            view.set("a", 2),
            Err(ReactiveError::Readonly { op: "set", .. })
        ));
        assert!(matches!(
            view.delete("a"),
            Err(ReactiveError::Readonly { op: "delete", .. })
        ));
        assert!(matches!(view.clear(), Err(ReactiveError::Readonly { op: "clear", .. })));
        assert_eq!(view.get("a"), Value::from(1));
    }

    #[test]
    fn readonly_over_reactive_still_tracks() {
        let state = reactive(Target::from_props([("a", 1)]));
        let view = readonly(state.clone());
        assert!(crate::observable::is_reactive(&view));
        assert!(crate::observable::is_readonly(&view));

        let runs = counter();
        let _effect = effect({
            let view = view.clone();
            let runs = runs.clone();
            move || {
                view.get("a");
                runs.fetch_add(1, Ordering::SeqCst);
            }
        });

        state.set("a", 2).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(view.get("a"), Value::from(2));
    }

    #[test]
    fn marker_keys_are_answered_untracked() {
        let state = reactive(Target::object());
        let raw = state.get(flags::RAW);

        assert_eq!(state.get(flags::IS_REACTIVE), Value::Bool(true));
        assert_eq!(state.get(flags::IS_READONLY), Value::Bool(false));
        assert_eq!(Some(raw), state.raw_target().map(Value::from));
    }

    #[test]
    fn has_and_delete_notify_iteration() {
        let state = reactive(Target::from_props([("a", 1)]));
        let keys = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let _effect = effect({
            let state = state.clone();
            let keys = keys.clone();
            move || {
                *keys.lock() = state.own_keys();
            }
        });
        assert_eq!(keys.lock().len(), 1);

        state.set("b", 2).unwrap();
        assert_eq!(keys.lock().len(), 2);

        assert!(state.delete("a").unwrap());
        assert_eq!(*keys.lock(), vec![PropKey::from("b")]);

        // deleting a missing key triggers nothing
        assert!(!state.delete("zzz").unwrap());
    }

    #[test]
    fn push_does_not_subscribe_to_length() {
        let list = reactive(Target::array());
        let source = reactive(Target::from_props([("n", 0)]));
        let runs = counter();

        let _effect = effect({
            let list = list.clone();
            let source = source.clone();
            let runs = runs.clone();
            move || {
                source.get("n");
                list.push(1).unwrap();
                runs.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        list.push(2).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        source.set("n", 1).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn pop_notifies_length_readers() {
        let list = reactive(Target::from_values([1, 2, 3]));
        let length = counter();

        let _effect = effect({
            let list = list.clone();
            let length = length.clone();
            move || length.store(list.len() as i32, Ordering::SeqCst)
        });

        assert_eq!(list.pop().unwrap(), Value::from(3));
        assert_eq!(length.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn map_set_notifies_value_iteration_not_key_iteration() {
        let map = reactive(Target::from_entries([("a", 1)]));
        let key_runs = counter();
        let value_runs = counter();

        let _keys = effect({
            let map = map.clone();
            let key_runs = key_runs.clone();
            move || {
                map.keys();
                key_runs.fetch_add(1, Ordering::SeqCst);
            }
        });
        let _values = effect({
            let map = map.clone();
            let value_runs = value_runs.clone();
            move || {
                map.values();
                value_runs.fetch_add(1, Ordering::SeqCst);
            }
        });

        map.set("a", 2).unwrap();
        assert_eq!(key_runs.load(Ordering::SeqCst), 1);
        assert_eq!(value_runs.load(Ordering::SeqCst), 2);

        map.set("b", 1).unwrap();
        assert_eq!(key_runs.load(Ordering::SeqCst), 2);
        assert_eq!(value_runs.load(Ordering::SeqCst), 3);

        map.clear().unwrap();
        assert_eq!(key_runs.load(Ordering::SeqCst), 3);
        assert_eq!(value_runs.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn write_through_prototype_does_not_trigger_parent() {
        let parent = reactive(Target::from_props([("foo", 1)]));
        let child = reactive(Target::object_with_proto(parent.clone()));
        let parent_runs = counter();
        let child_runs = counter();

        let _parent_effect = effect({
            let parent = parent.clone();
            let parent_runs = parent_runs.clone();
            move || {
                parent.get("foo");
                parent_runs.fetch_add(1, Ordering::SeqCst);
            }
        });
        let _child_effect = effect({
            let child = child.clone();
            let child_runs = child_runs.clone();
            move || {
                child.get("bar");
                child_runs.fetch_add(1, Ordering::SeqCst);
            }
        });

        // "bar" is missing on both; the write defines it on the child
        child.set("bar", 2).unwrap();
        assert_eq!(parent_runs.load(Ordering::SeqCst), 1);
        assert_eq!(child_runs.load(Ordering::SeqCst), 2);
        assert!(!parent.has("bar"));
    }
}
