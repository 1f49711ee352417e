//! Ripple Core
//!
//! This crate provides a fine-grained reactive state engine. It implements:
//!
//! - Observable views over plain objects, arrays and maps
//! - Dependency tracking between state and effects
//! - Refs, lazily cached computed values and effect scopes
//! - Watchers and a batching job scheduler
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `observable`: raw targets, the dynamic [`Value`](observable::Value) type
//!   and the reactive/readonly views over targets
//! - `reactive`: effects, dependency sets, refs, computed cells, scopes and
//!   watchers
//! - `scheduler`: the job queue that batches effect re-runs per tick
//!
//! # Example
//!
//! ```rust
//! use std::sync::atomic::{AtomicI64, Ordering};
//! use std::sync::Arc;
//!
//! use ripple_core::observable::{reactive, Target};
//! use ripple_core::reactive::{effect, Computed};
//!
//! let state = reactive(Target::from_props([("count", 1)]));
//!
//! let doubled = Computed::new({
//!     let state = state.clone();
//!     move || state.get("count").as_i64().unwrap_or_default() * 2
//! });
//!
//! let seen = Arc::new(AtomicI64::new(0));
//! let _runner = effect({
//!     let seen = seen.clone();
//!     move || seen.store(doubled.get(), Ordering::SeqCst)
//! });
//! assert_eq!(seen.load(Ordering::SeqCst), 2);
//!
//! state.set("count", 5).unwrap();
//! assert_eq!(seen.load(Ordering::SeqCst), 10);
//! ```

pub mod error;
pub mod observable;
pub mod reactive;
pub mod scheduler;

pub use error::{ReactiveError, Result};
