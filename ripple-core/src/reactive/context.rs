//! Reactive Context
//!
//! The reactive context tracks which effect is currently running and whether
//! reads should be recorded at all. This enables automatic dependency
//! tracking: when an observable field is read, the active effect becomes one
//! of its subscribers.
//!
//! # Implementation
//!
//! State is thread-local. Entering an effect run installs the effect as the
//! active one, forces tracking on and bumps the track depth; the
//! [`ReactiveContext`] guard restores the previous values when dropped, so the
//! context survives panics inside effect bodies.
//!
//! The depth selects the marker bit (`1 << depth`) that dependency sets use to
//! tell "tracked in the previous run" from "tracked in this run". Beyond
//! [`MAX_MARKER_BITS`] nested runs the marker scheme is abandoned in favour of
//! a full cleanup and plain membership checks.

use std::cell::RefCell;

use super::effect::ReactiveEffect;

/// Deepest nesting of effect runs that still uses marker bits.
pub const MAX_MARKER_BITS: u32 = 30;

thread_local! {
    static CONTEXT: RefCell<ContextState> = RefCell::new(ContextState::default());
}

struct ContextState {
    /// The effect whose body is executing.
    active: Option<ReactiveEffect>,

    /// Whether reads are recorded.
    should_track: bool,

    /// Saved `should_track` values for pause/enable/reset.
    track_stack: Vec<bool>,

    /// Number of nested effect runs.
    depth: u32,
}

impl Default for ContextState {
    fn default() -> Self {
        Self {
            active: None,
            should_track: true,
            track_stack: Vec::new(),
            depth: 0,
        }
    }
}

/// Guard for one effect run.
///
/// While alive, the effect is the active one and tracking is enabled. Dropping
/// the guard restores whatever was active before.
pub struct ReactiveContext {
    previous: Option<ReactiveEffect>,
    previous_should_track: bool,
    depth: u32,
}

impl ReactiveContext {
    /// Enter a run of `effect`.
    pub(crate) fn enter(effect: &ReactiveEffect) -> Self {
        CONTEXT.with(|context| {
            let mut context = context.borrow_mut();
            let previous = context.active.replace(effect.clone());
            let previous_should_track = std::mem::replace(&mut context.should_track, true);
            context.depth += 1;

            Self {
                previous,
                previous_should_track,
                depth: context.depth,
            }
        })
    }

    /// Nesting depth of this run (1 for a top-level run).
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Marker bit reserved for this run.
    pub fn track_op_bit(&self) -> u32 {
        marker_bit(self.depth)
    }

    /// Whether this run is shallow enough to use marker bits.
    pub fn uses_markers(&self) -> bool {
        self.depth <= MAX_MARKER_BITS
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        let finished = CONTEXT.with(|context| {
            let mut context = context.borrow_mut();
            debug_assert_eq!(context.depth, self.depth, "ReactiveContext dropped out of order");
            context.should_track = self.previous_should_track;
            context.depth -= 1;
            std::mem::replace(&mut context.active, self.previous.take())
        });
        // released outside the borrow; it may be the last handle
        drop(finished);
    }
}

fn marker_bit(depth: u32) -> u32 {
    1u32.checked_shl(depth).unwrap_or(0)
}

/// The effect currently executing, if any.
pub fn active_effect() -> Option<ReactiveEffect> {
    CONTEXT.with(|context| context.borrow().active.clone())
}

/// Whether `effect` is the one currently executing.
pub fn is_active_effect(effect: &ReactiveEffect) -> bool {
    CONTEXT.with(|context| context.borrow().active.as_ref() == Some(effect))
}

/// Whether a read right now would be recorded.
pub fn is_tracking() -> bool {
    CONTEXT.with(|context| {
        let context = context.borrow();
        context.should_track && context.active.is_some()
    })
}

pub fn should_track() -> bool {
    CONTEXT.with(|context| context.borrow().should_track)
}

/// Current run depth and its marker bit.
pub(crate) fn track_marker() -> (u32, u32) {
    CONTEXT.with(|context| {
        let depth = context.borrow().depth;
        (depth, marker_bit(depth))
    })
}

/// Stop recording reads until the matching [`reset_tracking`].
pub fn pause_tracking() {
    CONTEXT.with(|context| {
        let mut context = context.borrow_mut();
        let current = context.should_track;
        context.track_stack.push(current);
        context.should_track = false;
    });
}

/// Force recording on until the matching [`reset_tracking`].
pub fn enable_tracking() {
    CONTEXT.with(|context| {
        let mut context = context.borrow_mut();
        let current = context.should_track;
        context.track_stack.push(current);
        context.should_track = true;
    });
}

/// Undo the latest [`pause_tracking`] or [`enable_tracking`].
pub fn reset_tracking() {
    CONTEXT.with(|context| {
        let mut context = context.borrow_mut();
        context.should_track = context.track_stack.pop().unwrap_or(true);
    });
}

/// Run `f` without recording any reads.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    struct Reset;

    impl Drop for Reset {
        fn drop(&mut self) {
            reset_tracking();
        }
    }

    pause_tracking();
    let _reset = Reset;
    f()
}
