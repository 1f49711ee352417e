//! Reactive Primitives
//!
//! This module implements the dependency machinery behind observable state:
//! effects, dependency sets, refs, computed cells, scopes and watchers.
//!
//! # Concepts
//!
//! ## Effects
//!
//! A [`ReactiveEffect`] is a re-runnable computation. Whatever it reads while
//! running becomes a dependency; a write to any dependency runs it again (or
//! hands it to its scheduler).
//!
//! ## Dependency sets
//!
//! A [`Dep`] is the set of effects subscribed to one field, one ref or one
//! computed cell. [`track`] adds the running effect to a set and [`trigger`]
//! notifies every effect in the affected sets.
//!
//! ## Refs and computed cells
//!
//! A [`Ref`] is a single reactive cell. A [`Computed`] is a cached derived
//! value that recomputes lazily, only when read after one of its inputs
//! changed.
//!
//! ## Scopes and watchers
//!
//! An [`EffectScope`] collects effects so they can be stopped together.
//! [`watch`] and [`watch_effect`] connect reactive state to callbacks through
//! the scheduler.
//!
//! # Implementation Notes
//!
//! The active effect and the tracking switch live in a thread-local context.
//! Dependency sets and effect state are shared across threads behind locks,
//! and no lock is held while user code runs.

pub(crate) mod computed;
pub(crate) mod context;
pub(crate) mod debug;
pub(crate) mod dep;
pub(crate) mod effect;
pub(crate) mod refs;
pub(crate) mod runtime;
pub(crate) mod scope;
pub(crate) mod subscriber;
pub(crate) mod watch;

pub use computed::{Computed, ComputedState};
pub use context::{
    active_effect, enable_tracking, is_active_effect, is_tracking, pause_tracking, reset_tracking, should_track,
    untracked, ReactiveContext, MAX_MARKER_BITS,
};
pub use debug::{DebuggerEvent, EventInfo, Operation};
pub use dep::Dep;
pub use effect::{effect, effect_with, DebuggerHook, EffectFn, EffectOptions, ReactiveEffect, WeakEffect};
pub use refs::{trigger_ref, Ref, RefValue};
pub use runtime::{track, track_effects, trigger, trigger_dep, trigger_effects, TrackOp, TriggerOp};
pub use scope::{current_scope, on_scope_dispose, record_effect_scope, EffectScope};
pub use subscriber::SubscriberId;
pub use watch::{traverse, watch, watch_effect, watch_observable, FlushMode, OnCleanup, WatchHandle, WatchOptions};
