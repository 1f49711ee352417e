//! Raw targets.
//!
//! A [`Target`] is the plain structure behind every observable view: an
//! object (named properties plus an optional prototype), an array, or a map.
//! Operations on a `Target` itself never track or trigger; they are what the
//! wrappers in [`proxy`](super::proxy) delegate to after doing their
//! bookkeeping.
//!
//! Each target also owns its dependency sets, one per key that has been read
//! inside an effect, created lazily by [`Target::dep_for`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::cache;
use super::key::{PropKey, MAX_ARRAY_INDEX};
use super::value::Value;
use crate::error::{ReactiveError, Result};
use crate::reactive::Dep;

/// Stable identity of a raw target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TargetId(u64);

impl TargetId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target#{}", self.0)
    }
}

/// Shape of a raw target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Object,
    Array,
    Map,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Array => "array",
            Self::Map => "map",
        }
    }
}

/// A raw structure. Cloning yields another handle to the same structure.
#[derive(Clone)]
pub struct Target {
    inner: Arc<TargetInner>,
}

struct TargetInner {
    id: TargetId,
    kind: TargetKind,
    skip: AtomicBool,
    data: RwLock<TargetData>,
    deps: Mutex<IndexMap<PropKey, Dep>>,
}

enum TargetData {
    Object {
        props: IndexMap<PropKey, Value>,
        proto: Option<Value>,
    },
    Array(Vec<Value>),
    Map(IndexMap<PropKey, Value>),
}

impl Drop for TargetInner {
    fn drop(&mut self) {
        cache::forget(self.id);
    }
}

impl Target {
    fn with_data(kind: TargetKind, data: TargetData) -> Self {
        Self {
            inner: Arc::new(TargetInner {
                id: TargetId::next(),
                kind,
                skip: AtomicBool::new(false),
                data: RwLock::new(data),
                deps: Mutex::new(IndexMap::new()),
            }),
        }
    }

    /// An empty object.
    pub fn object() -> Self {
        Self::object_with_proto(None)
    }

    /// An empty object whose missing keys are looked up on `proto`.
    pub fn object_with_proto(proto: impl Into<Option<Value>>) -> Self {
        Self::with_data(
            TargetKind::Object,
            TargetData::Object {
                props: IndexMap::new(),
                proto: proto.into().filter(Value::is_structure),
            },
        )
    }

    pub fn array() -> Self {
        Self::with_data(TargetKind::Array, TargetData::Array(Vec::new()))
    }

    pub fn map() -> Self {
        Self::with_data(TargetKind::Map, TargetData::Map(IndexMap::new()))
    }

    /// An object with the given properties, in order.
    pub fn from_props<K, V>(props: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<PropKey>,
        V: Into<Value>,
    {
        let props = props
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self::with_data(TargetKind::Object, TargetData::Object { props, proto: None })
    }

    /// An array holding `values`.
    pub fn from_values<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        Self::with_data(TargetKind::Array, TargetData::Array(values))
    }

    /// A map with the given entries, in order.
    pub fn from_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<PropKey>,
        V: Into<Value>,
    {
        let entries = entries
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self::with_data(TargetKind::Map, TargetData::Map(entries))
    }

    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    pub fn kind(&self) -> TargetKind {
        self.inner.kind
    }

    pub fn is_skipped(&self) -> bool {
        self.inner.skip.load(Ordering::Relaxed)
    }

    /// Exclude this target from wrapping.
    pub fn mark_skip(&self) {
        self.inner.skip.store(true, Ordering::Relaxed);
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The prototype of an object target.
    pub fn proto(&self) -> Option<Value> {
        match &*self.inner.data.read() {
            TargetData::Object { proto, .. } => proto.clone(),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Raw structural operations
    // ------------------------------------------------------------------

    /// Own value at `key`; for arrays `length` is reported as a number.
    pub fn get_own(&self, key: &PropKey) -> Option<Value> {
        match &*self.inner.data.read() {
            TargetData::Object { props, .. } => props.get(key).cloned(),
            TargetData::Map(entries) => entries.get(key).cloned(),
            TargetData::Array(values) => match key {
                PropKey::Index(index) => values.get(*index).cloned(),
                key if key.is_length() => Some(Value::Number(values.len() as f64)),
                _ => None,
            },
        }
    }

    /// Value at `key`, falling back to the prototype chain. Reading through
    /// a wrapped prototype is tracked on that prototype.
    pub fn get(&self, key: &PropKey) -> Option<Value> {
        if let Some(value) = self.get_own(key) {
            return Some(value);
        }
        match self.proto()? {
            Value::Target(proto) => proto.get(key),
            Value::Observable(proto) => Some(proto.get(key.clone())),
            _ => None,
        }
    }

    pub fn has_own(&self, key: &PropKey) -> bool {
        match &*self.inner.data.read() {
            TargetData::Object { props, .. } => props.contains_key(key),
            TargetData::Map(entries) => entries.contains_key(key),
            TargetData::Array(values) => match key {
                PropKey::Index(index) => *index < values.len(),
                key => key.is_length(),
            },
        }
    }

    /// Whether `key` is present here or on the prototype chain.
    pub fn has(&self, key: &PropKey) -> bool {
        if self.has_own(key) {
            return true;
        }
        match self.proto() {
            Some(Value::Target(proto)) => proto.has(key),
            Some(Value::Observable(proto)) => proto.has(key.clone()),
            _ => false,
        }
    }

    /// Write `key`, creating it if needed.
    pub fn set(&self, key: impl Into<PropKey>, value: impl Into<Value>) -> Result<()> {
        self.set_with_receiver(&key.into(), value.into(), self)
    }

    /// Write `key` on behalf of `receiver`.
    ///
    /// A key missing here is resolved against the prototype; wherever the
    /// lookup ends, the property is defined on `receiver`.
    pub(crate) fn set_with_receiver(&self, key: &PropKey, value: Value, receiver: &Target) -> Result<()> {
        if !self.has_own(key) {
            match self.proto() {
                Some(Value::Observable(proto)) => return proto.set_with_receiver(key, value, receiver),
                Some(Value::Target(proto)) => return proto.set_with_receiver(key, value, receiver),
                _ => {}
            }
        }
        receiver.define(key, value)
    }

    /// Write an own property, ignoring the prototype.
    pub fn define(&self, key: &PropKey, value: Value) -> Result<()> {
        let mut data = self.inner.data.write();
        match &mut *data {
            TargetData::Object { props, .. } => {
                props.insert(key.clone(), value);
            }
            TargetData::Map(entries) => {
                entries.insert(key.clone(), value);
            }
            TargetData::Array(values) => match key {
                PropKey::Index(index) if *index <= MAX_ARRAY_INDEX => {
                    if *index >= values.len() {
                        resize_array(values, *index + 1)?;
                    }
                    values[*index] = value;
                }
                key if key.is_length() => {
                    let length = value.as_f64().unwrap_or(f64::NAN);
                    let valid = length.is_finite()
                        && length >= 0.0
                        && length.fract() == 0.0
                        && length <= (MAX_ARRAY_INDEX + 1) as f64;
                    if !valid {
                        return Err(ReactiveError::InvalidLength(length));
                    }
                    resize_array(values, length as usize)?;
                }
                _ => {
                    return Err(ReactiveError::Unsupported {
                        op: "set",
                        kind: TargetKind::Array.as_str(),
                    })
                }
            },
        }
        Ok(())
    }

    /// Remove an own key. Returns whether it was present.
    ///
    /// Deleting an array slot leaves a `Null` hole; the length is kept.
    pub fn delete(&self, key: &PropKey) -> bool {
        let mut data = self.inner.data.write();
        match &mut *data {
            TargetData::Object { props, .. } => props.shift_remove(key).is_some(),
            TargetData::Map(entries) => entries.shift_remove(key).is_some(),
            TargetData::Array(values) => match key {
                PropKey::Index(index) if *index < values.len() => {
                    values[*index] = Value::Null;
                    true
                }
                _ => false,
            },
        }
    }

    /// Own keys in insertion (or index) order.
    pub fn own_keys(&self) -> Vec<PropKey> {
        match &*self.inner.data.read() {
            TargetData::Object { props, .. } => props.keys().cloned().collect(),
            TargetData::Map(entries) => entries.keys().cloned().collect(),
            TargetData::Array(values) => (0..values.len()).map(PropKey::Index).collect(),
        }
    }

    /// Own values in key order.
    pub fn values(&self) -> Vec<Value> {
        match &*self.inner.data.read() {
            TargetData::Object { props, .. } => props.values().cloned().collect(),
            TargetData::Map(entries) => entries.values().cloned().collect(),
            TargetData::Array(values) => values.clone(),
        }
    }

    pub fn entries(&self) -> Vec<(PropKey, Value)> {
        match &*self.inner.data.read() {
            TargetData::Object { props, .. } => {
                props.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            }
            TargetData::Map(entries) => {
                entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            }
            TargetData::Array(values) => values
                .iter()
                .enumerate()
                .map(|(index, value)| (PropKey::Index(index), value.clone()))
                .collect(),
        }
    }

    /// Number of own entries (array length for arrays).
    pub fn len(&self) -> usize {
        match &*self.inner.data.read() {
            TargetData::Object { props, .. } => props.len(),
            TargetData::Map(entries) => entries.len(),
            TargetData::Array(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every own entry. Returns whether anything was removed.
    pub fn clear(&self) -> bool {
        let mut data = self.inner.data.write();
        let had_entries = match &mut *data {
            TargetData::Object { props, .. } => !props.is_empty(),
            TargetData::Map(entries) => !entries.is_empty(),
            TargetData::Array(values) => !values.is_empty(),
        };
        // values may own the last handle of another target; drop them after
        // the lock is released
        let removed: Vec<Value> = match &mut *data {
            TargetData::Object { props, .. } => std::mem::take(props).into_values().collect(),
            TargetData::Map(entries) => std::mem::take(entries).into_values().collect(),
            TargetData::Array(values) => std::mem::take(values),
        };
        drop(data);
        drop(removed);
        had_entries
    }

    // ------------------------------------------------------------------
    // Dependency sets
    // ------------------------------------------------------------------

    /// The dependency set for `key`, created on first use.
    pub fn dep_for(&self, key: &PropKey) -> Dep {
        self.inner
            .deps
            .lock()
            .entry(key.clone())
            .or_default()
            .clone()
    }

    /// Inspect the dependency sets without creating any.
    pub(crate) fn with_deps<R>(&self, f: impl FnOnce(&IndexMap<PropKey, Dep>) -> R) -> R {
        f(&self.inner.deps.lock())
    }

    /// Number of keys that have a dependency set.
    pub fn dep_count(&self) -> usize {
        self.inner.deps.lock().len()
    }
}

/// Grow or truncate an array, reporting an allocation failure instead of
/// aborting.
fn resize_array(values: &mut Vec<Value>, length: usize) -> Result<()> {
    if length > values.len() {
        values
            .try_reserve(length - values.len())
            .map_err(|_| ReactiveError::InvalidLength(length as f64))?;
    }
    values.resize(length, Value::Null);
    Ok(())
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Target {}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("len", &self.len())
            .finish()
    }
}
