//! Effect Scopes
//!
//! An [`EffectScope`] collects the effects (and computed cells, and watchers)
//! created while it is active so they can be stopped together. Scopes nest:
//! a scope created while another is active becomes its child and is stopped
//! with it, unless created detached.

use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::effect::ReactiveEffect;

thread_local! {
    static ACTIVE_SCOPE: RefCell<Option<EffectScope>> = const { RefCell::new(None) };
}

type Cleanup = Box<dyn FnOnce() + Send>;

/// A disposable group of effects.
#[derive(Clone)]
pub struct EffectScope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    detached: bool,
    state: Mutex<ScopeState>,
}

#[derive(Default)]
struct ScopeState {
    active: bool,
    effects: Vec<ReactiveEffect>,
    cleanups: Vec<Cleanup>,
    scopes: Vec<EffectScope>,
    parent: Option<Weak<ScopeInner>>,

    /// Position in the parent's child list.
    index: usize,
}

impl EffectScope {
    /// A scope attached to the currently active scope, if any.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// A scope that is not stopped with the active scope.
    pub fn detached() -> Self {
        Self::build(true)
    }

    fn build(detached: bool) -> Self {
        let scope = Self {
            inner: Arc::new(ScopeInner {
                detached,
                state: Mutex::new(ScopeState {
                    active: true,
                    ..ScopeState::default()
                }),
            }),
        };

        if !detached {
            if let Some(parent) = current_scope() {
                let index = {
                    let mut parent_state = parent.inner.state.lock();
                    parent_state.scopes.push(scope.clone());
                    parent_state.scopes.len() - 1
                };
                let mut state = scope.inner.state.lock();
                state.parent = Some(Arc::downgrade(&parent.inner));
                state.index = index;
            }
        }
        scope
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    pub fn is_detached(&self) -> bool {
        self.inner.detached
    }

    pub fn effect_count(&self) -> usize {
        self.inner.state.lock().effects.len()
    }

    /// Number of attached child scopes.
    pub fn scope_count(&self) -> usize {
        self.inner.state.lock().scopes.len()
    }

    /// Run `f` with this scope active. Returns `None` without running `f` if
    /// the scope was stopped.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if !self.is_active() {
            warn!("cannot run an inactive effect scope");
            return None;
        }

        struct Restore(Option<EffectScope>);

        impl Drop for Restore {
            fn drop(&mut self) {
                let previous = self.0.take();
                let replaced = ACTIVE_SCOPE.with(|active| active.replace(previous));
                drop(replaced);
            }
        }

        let previous = ACTIVE_SCOPE.with(|active| active.replace(Some(self.clone())));
        let _restore = Restore(previous);
        Some(f())
    }

    /// Make this scope the active one until [`off`](Self::off).
    pub fn on(&self) {
        let replaced = ACTIVE_SCOPE.with(|active| active.replace(Some(self.clone())));
        drop(replaced);
    }

    /// Make this scope's parent the active scope again.
    pub fn off(&self) {
        let parent = self.parent();
        let replaced = ACTIVE_SCOPE.with(|active| active.replace(parent));
        drop(replaced);
    }

    fn parent(&self) -> Option<EffectScope> {
        let parent = self.inner.state.lock().parent.clone()?;
        parent.upgrade().map(|inner| EffectScope { inner })
    }

    /// Stop every effect and child scope, run the dispose callbacks and
    /// detach from the parent. Idempotent.
    pub fn stop(&self) {
        self.stop_inner(false);
    }

    fn stop_inner(&self, from_parent: bool) {
        let (effects, cleanups, scopes) = {
            let mut state = self.inner.state.lock();
            if !state.active {
                return;
            }
            state.active = false;
            (
                mem::take(&mut state.effects),
                mem::take(&mut state.cleanups),
                mem::take(&mut state.scopes),
            )
        };

        debug!(
            effects = effects.len(),
            cleanups = cleanups.len(),
            scopes = scopes.len(),
            "effect scope stopped"
        );

        for effect in &effects {
            effect.stop();
        }
        for cleanup in cleanups {
            cleanup();
        }
        for scope in &scopes {
            scope.stop_inner(true);
        }

        if !from_parent {
            self.detach_from_parent();
        }
    }

    /// Swap-remove this scope from its parent's child list.
    fn detach_from_parent(&self) {
        let (parent, index) = {
            let mut state = self.inner.state.lock();
            (state.parent.take(), state.index)
        };
        let Some(parent) = parent.and_then(|parent| parent.upgrade()) else {
            return;
        };

        let mut parent_state = parent.state.lock();
        let is_self = parent_state
            .scopes
            .get(index)
            .is_some_and(|scope| Arc::ptr_eq(&scope.inner, &self.inner));
        if !is_self {
            return;
        }

        let removed = parent_state.scopes.swap_remove(index);
        if let Some(moved) = parent_state.scopes.get(index) {
            moved.inner.state.lock().index = index;
        }
        drop(parent_state);
        drop(removed);
    }

    fn record(&self, effect: &ReactiveEffect) {
        let mut state = self.inner.state.lock();
        if state.active {
            state.effects.push(effect.clone());
        }
    }

    fn add_cleanup(&self, cleanup: Cleanup) -> bool {
        let mut state = self.inner.state.lock();
        if state.active {
            state.cleanups.push(cleanup);
        }
        state.active
    }
}

impl Default for EffectScope {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for EffectScope {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for EffectScope {}

impl fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("EffectScope")
            .field("active", &state.active)
            .field("detached", &self.inner.detached)
            .field("effects", &state.effects.len())
            .field("scopes", &state.scopes.len())
            .finish()
    }
}

/// The scope effects are currently recorded in.
pub fn current_scope() -> Option<EffectScope> {
    ACTIVE_SCOPE.with(|active| active.borrow().clone())
}

/// Record `effect` in `scope`, or in the active scope when `scope` is `None`.
pub fn record_effect_scope(effect: &ReactiveEffect, scope: Option<&EffectScope>) {
    let scope = match scope {
        Some(scope) => Some(scope.clone()),
        None => current_scope(),
    };
    if let Some(scope) = scope {
        scope.record(effect);
    }
}

/// Run `f` when the active scope stops.
pub fn on_scope_dispose(f: impl FnOnce() + Send + 'static) {
    match current_scope() {
        Some(scope) => {
            if !scope.add_cleanup(Box::new(f)) {
                warn!("on_scope_dispose called on an inactive effect scope");
            }
        }
        None => warn!("on_scope_dispose called without an active effect scope"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::effect;
    use crate::reactive::refs::Ref;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn run_collects_effects() {
        let scope = EffectScope::new();
        let source = Ref::new(0);
        let runs = Arc::new(AtomicI32::new(0));

        scope.run(|| {
            let source = source.clone();
            let runs = runs.clone();
            effect(move || {
                source.get();
                runs.fetch_add(1, Ordering::SeqCst);
            });
        });
        assert_eq!(scope.effect_count(), 1);

        source.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        scope.stop();
        source.set(2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(!scope.is_active());
    }

    #[test]
    fn inactive_scope_does_not_run() {
        let scope = EffectScope::new();
        scope.stop();
        assert_eq!(scope.run(|| 1), None);
        // second stop is a no-op
        scope.stop();
    }

    #[test]
    fn nested_scopes_stop_with_parent() {
        let parent = EffectScope::new();
        let (child, detached) = parent
            .run(|| (EffectScope::new(), EffectScope::detached()))
            .unwrap();
        assert_eq!(parent.scope_count(), 1);

        parent.stop();
        assert!(!child.is_active());
        assert!(detached.is_active());
    }

    #[test]
    fn stopping_a_child_detaches_it() {
        let parent = EffectScope::new();
        let children: Vec<_> = parent
            .run(|| (0..3).map(|_| EffectScope::new()).collect())
            .unwrap();

        children[0].stop();
        assert_eq!(parent.scope_count(), 2);

        // the moved child took the freed slot and can still detach itself
        children[2].stop();
        assert_eq!(parent.scope_count(), 1);
        children[1].stop();
        assert_eq!(parent.scope_count(), 0);
    }

    #[test]
    fn dispose_callbacks_run_on_stop() {
        let scope = EffectScope::new();
        let disposed = Arc::new(AtomicI32::new(0));

        scope.run(|| {
            let disposed = disposed.clone();
            on_scope_dispose(move || {
                disposed.fetch_add(1, Ordering::SeqCst);
            });
        });

        scope.stop();
        scope.stop();
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn on_and_off_switch_the_active_scope() {
        let scope = EffectScope::new();
        scope.on();
        assert_eq!(current_scope(), Some(scope.clone()));
        scope.off();
        assert_eq!(current_scope(), None);
    }

    #[test]
    fn run_restores_previous_scope() {
        let outer = EffectScope::new();
        let inner = EffectScope::detached();

        outer.run(|| {
            inner.run(|| assert_eq!(current_scope(), Some(inner.clone())));
            assert_eq!(current_scope(), Some(outer.clone()));
        });
        assert_eq!(current_scope(), None);
    }
}
