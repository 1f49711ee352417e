//! Dynamic values.
//!
//! [`Value`] is what observable structures hold and what reads through them
//! return. Structures appear either as a raw [`Target`] or as an
//! [`Observable`] view over one.
//!
//! Equality is SameValue: `NaN` equals itself, `0.0` and `-0.0` differ, and
//! structures compare by identity. Writes use it to decide whether anything
//! changed.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use super::key::PropKey;
use super::proxy::Observable;
use super::target::{Target, TargetId, TargetKind};
use crate::error::{ReactiveError, Result};

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    /// A raw structure.
    Target(Target),
    /// An observable view of a structure.
    Observable(Observable),
}

/// SameValue comparison of two numbers.
pub fn same_number(a: f64, b: f64) -> bool {
    if a.is_nan() && b.is_nan() {
        return true;
    }
    a == b && a.is_sign_negative() == b.is_sign_negative()
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether this is a structure (raw or wrapped).
    pub fn is_structure(&self) -> bool {
        matches!(self, Self::Target(_) | Self::Observable(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_f64()
            .filter(|value| value.fract() == 0.0)
            .map(|value| value as i64)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_target(&self) -> Option<&Target> {
        match self {
            Self::Target(target) => Some(target),
            _ => None,
        }
    }

    pub fn as_observable(&self) -> Option<&Observable> {
        match self {
            Self::Observable(observable) => Some(observable),
            _ => None,
        }
    }

    /// The raw target behind this value, unwrapping any views.
    pub fn raw_target(&self) -> Option<Target> {
        match self {
            Self::Target(target) => Some(target.clone()),
            Self::Observable(observable) => Some(observable.target().clone()),
            _ => None,
        }
    }

    /// Name of the value's type, as used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Target(target) => target.kind().as_str(),
            Self::Observable(observable) => observable.target().kind().as_str(),
        }
    }

    fn unsupported(&self, op: &'static str) -> ReactiveError {
        ReactiveError::Unsupported {
            op,
            kind: self.type_name(),
        }
    }

    // ------------------------------------------------------------------
    // Structural access
    //
    // Views go through their interception; raw targets are read and
    // written directly.
    // ------------------------------------------------------------------

    /// Read `key`; `Null` when missing or when this is not a structure.
    pub fn get(&self, key: impl Into<PropKey>) -> Value {
        match self {
            Self::Observable(observable) => observable.get(key),
            Self::Target(target) => target.get(&key.into()).unwrap_or_default(),
            _ => Value::Null,
        }
    }

    pub fn set(&self, key: impl Into<PropKey>, value: impl Into<Value>) -> Result<()> {
        match self {
            Self::Observable(observable) => observable.set(key, value),
            Self::Target(target) => target.set(key, value),
            _ => Err(self.unsupported("set")),
        }
    }

    /// Remove `key`. Returns whether it was present.
    pub fn delete(&self, key: impl Into<PropKey>) -> Result<bool> {
        match self {
            Self::Observable(observable) => observable.delete(key),
            Self::Target(target) => Ok(target.delete(&key.into())),
            _ => Err(self.unsupported("delete")),
        }
    }

    pub fn has(&self, key: impl Into<PropKey>) -> bool {
        match self {
            Self::Observable(observable) => observable.has(key),
            Self::Target(target) => target.has(&key.into()),
            _ => false,
        }
    }

    pub fn own_keys(&self) -> Vec<PropKey> {
        match self {
            Self::Observable(observable) => observable.own_keys(),
            Self::Target(target) => target.own_keys(),
            _ => Vec::new(),
        }
    }

    /// Array length, or number of entries. Zero for non-structures.
    pub fn len(&self) -> usize {
        match self {
            Self::Observable(observable) => observable.len(),
            Self::Target(target) => target.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append to an array. Returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> Result<usize> {
        match self {
            Self::Observable(observable) => observable.push(value),
            Self::Target(target) if target.kind() == TargetKind::Array => {
                let length = target.len();
                target.set(length, value)?;
                Ok(length + 1)
            }
            _ => Err(self.unsupported("push")),
        }
    }

    /// Remove the last array element; `Null` when empty.
    pub fn pop(&self) -> Result<Value> {
        match self {
            Self::Observable(observable) => observable.pop(),
            Self::Target(target) if target.kind() == TargetKind::Array => {
                let Some(last) = target.len().checked_sub(1) else {
                    return Ok(Value::Null);
                };
                let value = target.get_own(&PropKey::Index(last)).unwrap_or_default();
                target.set("length", last)?;
                Ok(value)
            }
            _ => Err(self.unsupported("pop")),
        }
    }

    pub fn clear(&self) -> Result<()> {
        match self {
            Self::Observable(observable) => observable.clear(),
            Self::Target(target) => {
                target.clear();
                Ok(())
            }
            _ => Err(self.unsupported("clear")),
        }
    }

    pub fn keys(&self) -> Vec<PropKey> {
        match self {
            Self::Observable(observable) => observable.keys(),
            Self::Target(target) => target.own_keys(),
            _ => Vec::new(),
        }
    }

    pub fn values(&self) -> Vec<Value> {
        match self {
            Self::Observable(observable) => observable.values(),
            Self::Target(target) => target.values(),
            _ => Vec::new(),
        }
    }

    pub fn entries(&self) -> Vec<(PropKey, Value)> {
        match self {
            Self::Observable(observable) => observable.entries(),
            Self::Target(target) => target.entries(),
            _ => Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // JSON
    // ------------------------------------------------------------------

    /// Snapshot as JSON without tracking. Cycles are cut with `null`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut visiting = HashSet::new();
        self.to_json_inner(&mut visiting)
    }

    fn to_json_inner(&self, visiting: &mut HashSet<TargetId>) -> serde_json::Value {
        use serde_json::Value as Json;

        let target = match self {
            Self::Null => return Json::Null,
            Self::Bool(value) => return Json::Bool(*value),
            Self::Number(value) => {
                return serde_json::Number::from_f64(*value).map_or(Json::Null, Json::Number)
            }
            Self::String(value) => return Json::String(value.to_string()),
            Self::Target(target) => target.clone(),
            Self::Observable(observable) => observable.target().clone(),
        };

        if !visiting.insert(target.id()) {
            return Json::Null;
        }
        let json = match target.kind() {
            TargetKind::Array => Json::Array(
                target
                    .values()
                    .iter()
                    .map(|value| value.to_json_inner(visiting))
                    .collect(),
            ),
            TargetKind::Object | TargetKind::Map => Json::Object(
                target
                    .entries()
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.to_json_inner(visiting)))
                    .collect(),
            ),
        };
        visiting.remove(&target.id());
        json
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => same_number(*a, *b),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Target(a), Self::Target(b)) => a.ptr_eq(b),
            (Self::Observable(a), Self::Observable(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(value) => write!(f, "Bool({value})"),
            Self::Number(value) => write!(f, "Number({value})"),
            Self::String(value) => write!(f, "String({value:?})"),
            Self::Target(target) => fmt::Debug::fmt(target, f),
            Self::Observable(observable) => fmt::Debug::fmt(observable, f),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

macro_rules! impl_from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::Number(value as f64)
                }
            }
        )*
    };
}

impl_from_integer!(i32, i64, u32, u64, usize);

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(Arc::from(value))
    }
}

impl From<Arc<str>> for Value {
    fn from(value: Arc<str>) -> Self {
        Self::String(value)
    }
}

impl From<Target> for Value {
    fn from(target: Target) -> Self {
        Self::Target(target)
    }
}

impl From<Observable> for Value {
    fn from(observable: Observable) -> Self {
        Self::Observable(observable)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Self::Target(Target::from_values(values))
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match json {
            Json::Null => Self::Null,
            Json::Bool(value) => Self::Bool(value),
            Json::Number(value) => value.as_f64().map_or(Self::Null, Self::Number),
            Json::String(value) => Self::from(value),
            Json::Array(values) => Self::Target(Target::from_values(values)),
            Json::Object(props) => Self::Target(Target::from_props(props)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn same_value_semantics() {
        assert_eq!(Value::from(f64::NAN), Value::from(f64::NAN));
        assert_ne!(Value::from(0.0), Value::from(-0.0));
        assert_eq!(Value::from(2), Value::from(2.0));
        assert_ne!(Value::from(1), Value::from("1"));

        let a = Target::object();
        let b = Target::object();
        assert_eq!(Value::from(a.clone()), Value::from(a));
        assert_ne!(Value::from(b), Value::from(Target::object()));
    }

    #[test]
    fn json_round_trip_keeps_structure() {
        let value = Value::from(json!({ "name": "ripple", "tags": ["a", "b"], "n": 1.5 }));

        assert_eq!(value.get("name"), Value::from("ripple"));
        assert_eq!(value.get("tags").len(), 2);
        assert_eq!(
            value.to_json(),
            json!({ "name": "ripple", "tags": ["a", "b"], "n": 1.5 })
        );
    }

    #[test]
    fn cycles_serialize_as_null() {
        let value = Value::from(Target::object());
        value.set("self", value.clone()).unwrap();

        assert_eq!(value.to_json(), json!({ "self": null }));
    }

    #[test]
    fn primitives_reject_writes() {
        let value = Value::from(3);
        assert_eq!(value.get("foo"), Value::Null);
        assert_eq!(
            value.set("foo", 1),
            Err(ReactiveError::Unsupported { op: "set", kind: "number" })
        );
    }

    #[test]
    fn raw_array_push_and_pop() {
        let list = Value::from(vec![Value::from(1)]);
        assert_eq!(list.push(2).unwrap(), 2);
        assert_eq!(list.pop().unwrap(), Value::from(2));
        assert_eq!(list.len(), 1);
    }
}
