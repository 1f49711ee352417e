//! Identity cache.
//!
//! Maps a raw target to the views created for it, one per wrapping mode,
//! so that wrapping twice yields the same view. Views are held weakly; the
//! target's entry is dropped together with the target.

use std::sync::{OnceLock, Weak};

use dashmap::DashMap;
use smallvec::SmallVec;

use super::proxy::{Observable, ObservableInner, ProxyMode};
use super::target::TargetId;

/// Which view of a target: its mode, plus the mode of the reactive view it
/// was layered over, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ViewSlot {
    pub mode: ProxyMode,
    pub base: Option<ProxyMode>,
}

type Views = SmallVec<[(ViewSlot, Weak<ObservableInner>); 2]>;

static REGISTRY: OnceLock<DashMap<TargetId, Views>> = OnceLock::new();

fn get_registry() -> &'static DashMap<TargetId, Views> {
    REGISTRY.get_or_init(DashMap::new)
}

/// The live view for `slot`, or the one built by `create`.
///
/// The target's entry stays locked while `create` runs, so two callers can
/// never both create a view for the same slot.
pub(crate) fn get_or_create(
    target: TargetId,
    slot: ViewSlot,
    create: impl FnOnce() -> Observable,
) -> Observable {
    let mut views = get_registry().entry(target).or_default();
    views.retain(|(_, view)| view.strong_count() > 0);

    let existing = views
        .iter()
        .find(|(cached, _)| *cached == slot)
        .and_then(|(_, view)| view.upgrade());
    if let Some(inner) = existing {
        return Observable::from_inner(inner);
    }

    let view = create();
    views.push((slot, view.downgrade()));
    view
}

/// Drop every cached view of `target`.
pub(crate) fn forget(target: TargetId) {
    if let Some(registry) = REGISTRY.get() {
        registry.remove(&target);
    }
}

/// Number of live views cached for `target`.
pub fn cached_views(target: TargetId) -> usize {
    get_registry()
        .get(&target)
        .map_or(0, |views| {
            views.iter().filter(|(_, view)| view.strong_count() > 0).count()
        })
}
