//! Track / Trigger
//!
//! The runtime connects observable state with effects.
//!
//! # How It Works
//!
//! 1. When a field is read inside a running effect, [`track`] looks up (or
//!    creates) the field's dependency set on its raw target and subscribes
//!    the active effect to it.
//!
//! 2. When a field is written, [`trigger`] works out which dependency sets
//!    the write affects: the field's own set, and depending on the operation
//!    the enumeration sets, the array `length` set, or everything for a
//!    `clear`.
//!
//! 3. The affected effects are merged into one deduplicated batch and
//!    notified in two passes: computed getters first, so that plain effects
//!    re-running in the second pass already see those cells as dirty.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::trace;

use super::context::{self, MAX_MARKER_BITS};
use super::debug::EventInfo;
use super::dep::Dep;
use super::effect::ReactiveEffect;
use crate::observable::{PropKey, Target, TargetKind, Value};

/// Kinds of reads that create subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackOp {
    Get,
    Has,
    Iterate,
}

/// Kinds of writes that notify subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOp {
    Set,
    Add,
    Delete,
    Clear,
}

/// Record a read of `key` on `target` against the running effect.
pub fn track(target: &Target, op: TrackOp, key: &PropKey) {
    if !context::is_tracking() {
        return;
    }

    let dep = target.dep_for(key);
    trace!(target_id = %target.id(), key = %key, ?op, "track");
    let info = EventInfo::track(Some(target.id()), op, Some(key.clone()));
    track_effects(&dep, Some(&info));
}

/// Subscribe the running effect to `dep`.
///
/// Within the marker depth a set that already saw this run is recognised
/// from its `n` bits without a membership lookup; deeper runs fall back to a
/// plain membership check.
pub fn track_effects(dep: &Dep, info: Option<&EventInfo>) {
    if !context::should_track() {
        return;
    }
    let Some(effect) = context::active_effect() else {
        return;
    };

    let (depth, bit) = context::track_marker();
    let should_track = if depth <= MAX_MARKER_BITS {
        dep.mark_tracked(bit)
    } else {
        !dep.contains(effect.id())
    };

    if should_track {
        dep.add(&effect);
        effect.push_dep(dep, info);
    }
}

/// Notify everything affected by a write to `key` on `target`.
///
/// `new_value` is only consulted for `length` writes on arrays, where it is
/// the new length.
pub fn trigger(target: &Target, op: TriggerOp, key: Option<&PropKey>, new_value: Option<&Value>) {
    let kind = target.kind();
    let is_array = kind == TargetKind::Array;
    let is_map = kind == TargetKind::Map;

    let deps: SmallVec<[Dep; 4]> = target.with_deps(|deps| {
        let mut affected = SmallVec::new();
        if deps.is_empty() {
            return affected;
        }

        if op == TriggerOp::Clear {
            affected.extend(deps.values().cloned());
        } else if is_array && key.is_some_and(PropKey::is_length) {
            let new_length = new_value.and_then(Value::as_f64).unwrap_or(0.0);
            for (key, dep) in deps {
                let truncated = key.as_index().is_some_and(|index| index as f64 >= new_length);
                if key.is_length() || truncated {
                    affected.push(dep.clone());
                }
            }
        } else {
            if let Some(dep) = key.and_then(|key| deps.get(key)) {
                affected.push(dep.clone());
            }

            match op {
                TriggerOp::Add => {
                    if !is_array {
                        affected.extend(deps.get(&PropKey::Iterate).cloned());
                        if is_map {
                            affected.extend(deps.get(&PropKey::MapKeyIterate).cloned());
                        }
                    } else if key.and_then(PropKey::as_index).is_some() {
                        affected.extend(deps.get(&PropKey::length()).cloned());
                    }
                }
                TriggerOp::Delete => {
                    if !is_array {
                        affected.extend(deps.get(&PropKey::Iterate).cloned());
                        if is_map {
                            affected.extend(deps.get(&PropKey::MapKeyIterate).cloned());
                        }
                    }
                }
                TriggerOp::Set => {
                    if is_map {
                        affected.extend(deps.get(&PropKey::Iterate).cloned());
                    }
                }
                TriggerOp::Clear => {}
            }
        }
        affected
    });

    if deps.is_empty() {
        return;
    }

    let mut batch: IndexMap<_, ReactiveEffect> = IndexMap::new();
    for dep in &deps {
        for effect in dep.subscribers() {
            batch.entry(effect.id()).or_insert(effect);
        }
    }

    trace!(
        target_id = %target.id(),
        key = ?key.map(ToString::to_string),
        ?op,
        effects = batch.len(),
        "trigger"
    );
    let info = EventInfo::trigger(Some(target.id()), op, key.cloned());
    let effects: Vec<_> = batch.into_values().collect();
    trigger_effects(&effects, Some(&info));
}

/// Notify the members of a single set (refs and computed cells).
pub fn trigger_dep(dep: &Dep, info: Option<&EventInfo>) {
    let effects = dep.subscribers();
    if !effects.is_empty() {
        trigger_effects(&effects, info);
    }
}

/// Notify a batch: computed getters first, then everything else.
pub fn trigger_effects(effects: &[ReactiveEffect], info: Option<&EventInfo>) {
    for effect in effects.iter().filter(|effect| effect.is_computed()) {
        effect.trigger(info);
    }
    for effect in effects.iter().filter(|effect| !effect.is_computed()) {
        effect.trigger(info);
    }
}
