//! Observable State
//!
//! Plain structures become observable by wrapping them in a view. Every read
//! through a view is recorded against the running effect, every write
//! notifies the effects that read the written field.
//!
//! # Concepts
//!
//! ## Targets
//!
//! A [`Target`] is a raw object, array or map. Reading or writing a target
//! directly is invisible to the reactive system.
//!
//! ## Views
//!
//! An [`Observable`] intercepts the operations on one target. There is at
//! most one view per target and mode, so wrapping is idempotent:
//! `reactive(reactive(x)) == reactive(x)` and `to_raw(reactive(x)) == x`.
//!
//! ## Values
//!
//! Both travel inside [`Value`], the dynamic value type stored in targets.
//! The functions below accept anything convertible into a `Value` and leave
//! primitives untouched.

mod cache;
mod key;
mod proxy;
mod target;
mod value;

pub use cache::cached_views;
pub use key::{flags, PropKey, MAX_ARRAY_INDEX};
pub use proxy::{Observable, ProxyMode};
pub use target::{Target, TargetId, TargetKind};
pub use value::{same_number, Value};

use cache::ViewSlot;

fn create_view(value: Value, mode: ProxyMode) -> Value {
    match value {
        Value::Target(target) => {
            if target.is_skipped() {
                return Value::Target(target);
            }
            let slot = ViewSlot { mode, base: None };
            let view = cache::get_or_create(target.id(), slot, || {
                Observable::new(target.clone(), mode, None)
            });
            Value::Observable(view)
        }
        // a readonly view over a reactive view is a distinct, layered view
        Value::Observable(base) if mode.is_readonly() && !base.is_readonly() => {
            let target = base.target().clone();
            if target.is_skipped() {
                return Value::Observable(base);
            }
            let slot = ViewSlot {
                mode,
                base: Some(base.mode()),
            };
            let view = cache::get_or_create(target.id(), slot, || {
                Observable::new(target.clone(), mode, Some(base.clone()))
            });
            Value::Observable(view)
        }
        other => other,
    }
}

/// Deep reactive view of `value`.
///
/// Readonly views are returned unchanged.
pub fn reactive(value: impl Into<Value>) -> Value {
    create_view(value.into(), ProxyMode::Reactive)
}

/// Reactive view that tracks only its own keys; nested structures are
/// returned as stored.
pub fn shallow_reactive(value: impl Into<Value>) -> Value {
    create_view(value.into(), ProxyMode::ShallowReactive)
}

/// Deep readonly view of `value`.
///
/// Over a reactive view this creates a readonly view that still tracks
/// through the reactive one.
pub fn readonly(value: impl Into<Value>) -> Value {
    create_view(value.into(), ProxyMode::Readonly)
}

pub fn shallow_readonly(value: impl Into<Value>) -> Value {
    create_view(value.into(), ProxyMode::ShallowReadonly)
}

/// The raw target behind any number of views; other values unchanged.
pub fn to_raw(value: &Value) -> Value {
    match value {
        Value::Observable(view) => Value::Target(view.target().clone()),
        other => other.clone(),
    }
}

/// `reactive(value)` for structures, `value` otherwise.
pub fn to_reactive(value: Value) -> Value {
    if value.is_structure() {
        reactive(value)
    } else {
        value
    }
}

/// `readonly(value)` for structures, `value` otherwise.
pub fn to_readonly(value: Value) -> Value {
    if value.is_structure() {
        readonly(value)
    } else {
        value
    }
}

pub fn is_reactive(value: &Value) -> bool {
    value.as_observable().is_some_and(Observable::is_reactive)
}

pub fn is_readonly(value: &Value) -> bool {
    value.as_observable().is_some_and(Observable::is_readonly)
}

pub fn is_shallow(value: &Value) -> bool {
    value.as_observable().is_some_and(Observable::is_shallow)
}

/// Whether `value` is any kind of view.
pub fn is_proxy(value: &Value) -> bool {
    value.as_observable().is_some()
}

/// Exclude the target behind `value` from wrapping. Returns `value`.
pub fn mark_raw(value: Value) -> Value {
    if let Some(target) = value.raw_target() {
        target.mark_skip();
    }
    value
}
