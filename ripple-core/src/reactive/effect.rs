//! Effect Implementation
//!
//! A [`ReactiveEffect`] is a re-runnable computation. Running it installs it
//! as the active effect, so every observable read inside its body subscribes
//! it to that field's dependency set; a later write to the field triggers it
//! again.
//!
//! # How Effects Work
//!
//! 1. `run()` walks the chain of currently running effects and refuses to
//!    start if it finds itself there (an effect synchronously re-triggering
//!    itself).
//!
//! 2. The run marks every dependency set it belonged to as "was tracked",
//!    executes the body (reads mark sets as "newly tracked"), and finally
//!    unsubscribes from sets that were not read again.
//!
//! 3. When triggered, an effect with a scheduler hands itself to the
//!    scheduler; one without re-runs immediately.
//!
//! # Stopping
//!
//! `stop()` detaches the effect from every set, calls `on_stop` and marks it
//! inactive. Stopping an effect from inside its own run is deferred until the
//! run finishes. A stopped effect can still be `run()`, once per call, but
//! records nothing.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::context::{self, ReactiveContext};
use super::debug::{DebuggerEvent, EventInfo};
use super::dep::{Dep, WeakDep};
use super::scope::{self, EffectScope};
use super::subscriber::SubscriberId;

/// Body or scheduler callback of an effect.
pub type EffectFn = dyn Fn() + Send + Sync;

/// Receives debugger events.
pub type DebuggerHook = Arc<dyn Fn(&DebuggerEvent) + Send + Sync>;

/// Options accepted by [`effect_with`].
#[derive(Clone, Default)]
pub struct EffectOptions {
    /// Do not run on creation.
    pub lazy: bool,

    /// Called instead of re-running when a dependency changes.
    pub scheduler: Option<Arc<EffectFn>>,

    /// Scope to register with instead of the active one.
    pub scope: Option<EffectScope>,

    /// Allow the effect to be triggered by its own writes.
    pub allow_recurse: bool,

    pub on_stop: Option<Arc<EffectFn>>,
    pub on_track: Option<DebuggerHook>,
    pub on_trigger: Option<DebuggerHook>,
}

impl EffectOptions {
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn scheduler(mut self, scheduler: impl Fn() + Send + Sync + 'static) -> Self {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    pub fn scope(mut self, scope: &EffectScope) -> Self {
        self.scope = Some(scope.clone());
        self
    }

    pub fn allow_recurse(mut self) -> Self {
        self.allow_recurse = true;
        self
    }

    pub fn on_stop(mut self, on_stop: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_stop = Some(Arc::new(on_stop));
        self
    }

    pub fn on_track(mut self, hook: impl Fn(&DebuggerEvent) + Send + Sync + 'static) -> Self {
        self.on_track = Some(Arc::new(hook));
        self
    }

    pub fn on_trigger(mut self, hook: impl Fn(&DebuggerEvent) + Send + Sync + 'static) -> Self {
        self.on_trigger = Some(Arc::new(hook));
        self
    }
}

/// A re-runnable computation that tracks what it reads.
///
/// Cloning yields another handle to the same effect.
#[derive(Clone)]
pub struct ReactiveEffect {
    inner: Arc<EffectInner>,
}

/// Handle that does not keep the effect alive.
#[derive(Clone)]
pub struct WeakEffect {
    inner: Weak<EffectInner>,
}

struct EffectInner {
    id: SubscriberId,
    body: Box<EffectFn>,
    scheduler: Option<Arc<EffectFn>>,

    /// Set for the getter effect of a computed cell; such effects are
    /// notified before plain effects.
    computed: bool,

    allow_recurse: AtomicBool,
    state: Mutex<EffectState>,
}

struct EffectState {
    active: bool,

    /// Dependency sets this effect is subscribed to.
    deps: SmallVec<[WeakDep; 4]>,

    /// The effect that was active when this run started. Only set while
    /// running.
    parent: Option<ReactiveEffect>,

    defer_stop: bool,
    run_count: usize,
    on_stop: Option<Arc<EffectFn>>,
    on_track: Option<DebuggerHook>,
    on_trigger: Option<DebuggerHook>,
}

impl ReactiveEffect {
    /// Create an effect without a scheduler. It does not run until
    /// [`run`](Self::run) is called.
    pub fn new<F>(body: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::build(Box::new(body), None, false, None)
    }

    /// Create an effect whose re-runs are delegated to `scheduler`.
    pub fn with_scheduler<F, S>(body: F, scheduler: S) -> Self
    where
        F: Fn() + Send + Sync + 'static,
        S: Fn() + Send + Sync + 'static,
    {
        Self::build(Box::new(body), Some(Arc::new(scheduler)), false, None)
    }

    pub(crate) fn build(
        body: Box<EffectFn>,
        scheduler: Option<Arc<EffectFn>>,
        computed: bool,
        scope: Option<&EffectScope>,
    ) -> Self {
        let effect = Self {
            inner: Arc::new(EffectInner {
                id: SubscriberId::new(),
                body,
                scheduler,
                computed,
                allow_recurse: AtomicBool::new(false),
                state: Mutex::new(EffectState {
                    active: true,
                    deps: SmallVec::new(),
                    parent: None,
                    defer_stop: false,
                    run_count: 0,
                    on_stop: None,
                    on_track: None,
                    on_trigger: None,
                }),
            }),
        };
        scope::record_effect_scope(&effect, scope);
        effect
    }

    fn state(&self) -> MutexGuard<'_, EffectState> {
        self.inner.state.lock()
    }

    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    pub fn is_active(&self) -> bool {
        self.state().active
    }

    pub fn is_computed(&self) -> bool {
        self.inner.computed
    }

    pub fn has_scheduler(&self) -> bool {
        self.inner.scheduler.is_some()
    }

    pub fn allows_recurse(&self) -> bool {
        self.inner.allow_recurse.load(Ordering::Relaxed)
    }

    pub fn set_allow_recurse(&self, allow: bool) {
        self.inner.allow_recurse.store(allow, Ordering::Relaxed);
    }

    /// Replace the callback invoked when the effect stops.
    pub fn set_on_stop(&self, on_stop: Option<Arc<EffectFn>>) {
        self.state().on_stop = on_stop;
    }

    pub fn set_on_track(&self, hook: Option<DebuggerHook>) {
        self.state().on_track = hook;
    }

    pub fn set_on_trigger(&self, hook: Option<DebuggerHook>) {
        self.state().on_trigger = hook;
    }

    /// Number of times the body ran with tracking.
    pub fn run_count(&self) -> usize {
        self.state().run_count
    }

    /// Number of dependency sets the effect is subscribed to.
    pub fn dependency_count(&self) -> usize {
        self.state()
            .deps
            .iter()
            .filter(|dep| dep.strong_count() > 0)
            .count()
    }

    pub fn downgrade(&self) -> WeakEffect {
        WeakEffect {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The effect that started this effect's current run.
    pub(crate) fn parent(&self) -> Option<ReactiveEffect> {
        self.state().parent.clone()
    }

    /// Mark inactive without detaching; used for uncached computed getters.
    pub(crate) fn deactivate(&self) {
        self.state().active = false;
    }

    /// Execute the body, recording its reads.
    ///
    /// Returns false when the run was refused because the effect is already
    /// on the stack of running effects.
    pub fn run(&self) -> bool {
        if !self.is_active() {
            context::untracked(|| (self.inner.body)());
            return true;
        }

        if self.is_running() {
            trace!(effect = %self.id(), "recursive run skipped");
            return false;
        }

        let run = RunGuard::enter(self);
        (self.inner.body)();
        drop(run);
        true
    }

    /// Whether this effect is on the chain of currently running effects.
    fn is_running(&self) -> bool {
        let mut cursor = context::active_effect();
        while let Some(effect) = cursor {
            if effect == *self {
                return true;
            }
            cursor = effect.parent();
        }
        false
    }

    /// Detach from every dependency set. Idempotent; deferred while the
    /// effect, or any effect it started, is running.
    pub fn stop(&self) {
        if self.is_running() {
            trace!(effect = %self.id(), "stop deferred until run completes");
            self.state().defer_stop = true;
            return;
        }

        let (deps, on_stop) = {
            let mut state = self.state();
            if !state.active {
                return;
            }
            state.active = false;
            (mem::take(&mut state.deps), state.on_stop.clone())
        };

        for dep in deps.iter().filter_map(Dep::upgrade) {
            dep.remove(self.id());
        }
        debug!(effect = %self.id(), "effect stopped");

        if let Some(on_stop) = on_stop {
            on_stop();
        }
    }

    /// Notify this effect that something it reads changed.
    pub(crate) fn trigger(&self, info: Option<&EventInfo>) {
        if context::is_active_effect(self) && !self.allows_recurse() {
            return;
        }

        if let Some(info) = info {
            let hook = self.state().on_trigger.clone();
            if let Some(hook) = hook {
                hook(&self.event(info));
            }
        }

        match &self.inner.scheduler {
            Some(scheduler) => scheduler(),
            None => {
                self.run();
            }
        }
    }

    /// Record that this effect now belongs to `dep`.
    pub(crate) fn push_dep(&self, dep: &Dep, info: Option<&EventInfo>) {
        let hook = {
            let mut state = self.state();
            state.deps.push(dep.downgrade());
            state.on_track.clone()
        };

        if let (Some(hook), Some(info)) = (hook, info) {
            hook(&self.event(info));
        }
    }

    fn event(&self, info: &EventInfo) -> DebuggerEvent {
        DebuggerEvent {
            effect: self.id(),
            info: info.clone(),
        }
    }

    fn init_dep_markers(&self, bit: u32) {
        let state = self.state();
        for dep in state.deps.iter().filter_map(Dep::upgrade) {
            dep.mark_was_tracked(bit);
        }
    }

    fn finalize_dep_markers(&self, bit: u32) {
        let id = self.id();
        self.state().deps.retain(|weak| match Dep::upgrade(weak) {
            Some(dep) => dep.finalize(id, bit),
            None => false,
        });
    }

    fn cleanup(&self) {
        let deps = mem::take(&mut self.state().deps);
        for dep in deps.iter().filter_map(Dep::upgrade) {
            dep.remove(self.id());
        }
    }
}

/// Brackets one tracked run; its drop restores the context, prunes stale
/// dependencies and performs a deferred stop, also when the body panics.
struct RunGuard<'a> {
    effect: &'a ReactiveEffect,
    context: Option<ReactiveContext>,
    bit: u32,
    markers: bool,
}

impl<'a> RunGuard<'a> {
    fn enter(effect: &'a ReactiveEffect) -> Self {
        let parent = context::active_effect();
        {
            let mut state = effect.state();
            state.parent = parent;
            state.run_count += 1;
        }

        let context = ReactiveContext::enter(effect);
        let bit = context.track_op_bit();
        let markers = context.uses_markers();
        if markers {
            effect.init_dep_markers(bit);
        } else {
            effect.cleanup();
        }

        Self {
            effect,
            context: Some(context),
            bit,
            markers,
        }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.markers {
            self.effect.finalize_dep_markers(self.bit);
        }
        drop(self.context.take());

        let (parent, defer_stop) = {
            let mut state = self.effect.state();
            (state.parent.take(), mem::take(&mut state.defer_stop))
        };
        drop(parent);

        if defer_stop {
            self.effect.stop();
        }
    }
}

impl PartialEq for ReactiveEffect {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ReactiveEffect {}

impl fmt::Debug for ReactiveEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveEffect")
            .field("id", &self.id())
            .field("active", &self.is_active())
            .field("computed", &self.is_computed())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

impl WeakEffect {
    pub fn upgrade(&self) -> Option<ReactiveEffect> {
        self.inner.upgrade().map(|inner| ReactiveEffect { inner })
    }
}

/// Create an effect and run it once.
pub fn effect<F>(body: F) -> ReactiveEffect
where
    F: Fn() + Send + Sync + 'static,
{
    effect_with(body, EffectOptions::default())
}

/// Create an effect with options; runs it unless `lazy`.
pub fn effect_with<F>(body: F, options: EffectOptions) -> ReactiveEffect
where
    F: Fn() + Send + Sync + 'static,
{
    let effect = ReactiveEffect::build(
        Box::new(body),
        options.scheduler,
        false,
        options.scope.as_ref(),
    );
    effect.set_allow_recurse(options.allow_recurse);
    {
        let mut state = effect.state();
        state.on_stop = options.on_stop;
        state.on_track = options.on_track;
        state.on_trigger = options.on_trigger;
    }

    if !options.lazy {
        effect.run();
    }
    effect
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
