use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::versioning::VersionId;

/// The mutable state of the aggregation engine: the active version and the in-flight flag.
///
/// The active version only changes through `advance`, the flag only through
/// `try_begin` and the returned guard.
#[derive(Debug)]
pub struct EngineState {
    active: RwLock<VersionId>,
    updating: AtomicBool,
}

impl EngineState {
    /// Creates a new idle `EngineState`.
    ///
    /// # Arguments
    /// * `active` - The version clients currently target.
    ///
    /// # Returns
    /// A new `EngineState` instance.
    pub fn new(active: VersionId) -> Self {
        Self {
            active: RwLock::new(active),
            updating: AtomicBool::new(false),
        }
    }

    pub fn active(&self) -> VersionId {
        self.active.read().clone()
    }

    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::Acquire)
    }

    /// Tries to move from idle to aggregating.
    ///
    /// # Returns
    /// A guard that moves back to idle when dropped, or `None` if a cycle is already in flight.
    pub(super) fn try_begin(&self) -> Option<CycleGuard<'_>> {
        self.updating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .ok()
            .map(|_| CycleGuard {
                updating: &self.updating,
            })
    }

    /// Makes `version` the active version.
    pub(super) fn advance(&self, version: VersionId) {
        *self.active.write() = version;
    }
}

/// Clears the in-flight flag on every exit path of a cycle.
pub(super) struct CycleGuard<'a> {
    updating: &'a AtomicBool,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.updating.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_cycle_at_a_time() {
        let state = EngineState::new(VersionId::min());

        let guard = state.try_begin();
        assert!(guard.is_some());
        assert!(state.is_updating());
        assert!(state.try_begin().is_none());

        drop(guard);
        assert!(!state.is_updating());
        assert!(state.try_begin().is_some());
    }

    #[test]
    fn advance_replaces_active_version() {
        let state = EngineState::new(VersionId::min());
        let next = VersionId::new("1540000000000").unwrap();

        state.advance(next.clone());
        assert_eq!(state.active(), next);
    }
}
