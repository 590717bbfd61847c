//! Registration, iteration order, pending tracking, and reset semantics
//! shared by the HTTP and TCP listeners (spec §4.6).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::diag::server_debug;
use crate::error::PendingMockError;
use crate::mock::MockCell;

/// An ordered, append-only (until `reset`) list of registered mocks, plus
/// the id counter used to assign each one its registration sequence.
pub struct MockSet<C: MockCell> {
    mocks: Mutex<Vec<Arc<C>>>,
    next_id: AtomicU64,
}

impl<C: MockCell> Default for MockSet<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: MockCell> MockSet<C> {
    pub fn new() -> Self {
        Self {
            mocks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Registration appends (spec §4.6).
    pub fn register(&self, cell: Arc<C>) {
        self.mocks.lock().unwrap().push(cell);
    }

    /// A point-in-time copy of the registered mocks, in insertion order.
    /// Matchers always scan this snapshot in order (spec §4.4 step 3, §4.5
    /// step 2, §5 "Mock search is strict insertion order").
    pub fn snapshot(&self) -> Vec<Arc<C>> {
        self.mocks.lock().unwrap().clone()
    }

    /// `reset(throwOnPending)`: partitions into pending/matched, discards
    /// all, and either raises or logs the pending ones (spec §4.6, §9 "reset
    /// empties the mock list even when it raises").
    pub fn reset(&self, throw_on_pending: bool) -> Result<(), PendingMockError> {
        let drained = std::mem::take(&mut *self.mocks.lock().unwrap());
        let pending: Vec<String> = drained
            .iter()
            .filter(|m| !m.is_done())
            .map(|m| m.display_form())
            .collect();

        if pending.is_empty() {
            return Ok(());
        }

        if throw_on_pending {
            return Err(PendingMockError::new(pending));
        }

        for p in &pending {
            server_debug!("reset: discarding pending mock without asserting: {p}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct FakeCell {
        id: u64,
        done: AtomicBool,
    }

    impl MockCell for FakeCell {
        fn is_done(&self) -> bool {
            self.done.load(Ordering::SeqCst)
        }
        fn mark_done(&self) -> bool {
            self.done
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        }
        fn display_form(&self) -> String {
            format!("FAKE{{id={}}}", self.id)
        }
        fn id(&self) -> u64 {
            self.id
        }
    }

    fn cell(set: &MockSet<FakeCell>) -> Arc<FakeCell> {
        Arc::new(FakeCell {
            id: set.next_id(),
            done: AtomicBool::new(false),
        })
    }

    #[test]
    fn reset_succeeds_when_nothing_pending() {
        let set = MockSet::new();
        let a = cell(&set);
        set.register(a.clone());
        assert!(a.mark_done());
        assert!(set.reset(true).is_ok());
        assert!(set.snapshot().is_empty());
    }

    #[test]
    fn reset_raises_naming_pending_mocks_and_still_drains() {
        let set = MockSet::new();
        let a = cell(&set);
        let b = cell(&set);
        set.register(a.clone());
        set.register(b.clone());
        assert!(a.mark_done());

        let err = set.reset(true).unwrap_err();
        assert_eq!(err.pending(), &["FAKE{id=1}".to_string()]);
        // §9: reset empties the mock list even when it raises.
        assert!(set.snapshot().is_empty());
    }

    #[test]
    fn reset_without_throw_on_pending_drains_quietly() {
        let set = MockSet::new();
        set.register(cell(&set));
        assert!(set.reset(false).is_ok());
        assert!(set.snapshot().is_empty());
    }

    #[test]
    fn mark_done_is_a_one_time_transition() {
        let set = MockSet::new();
        let a = cell(&set);
        assert!(a.mark_done());
        assert!(!a.mark_done());
    }

    #[test]
    fn snapshot_preserves_insertion_order() {
        let set = MockSet::new();
        let a = cell(&set);
        let b = cell(&set);
        let c = cell(&set);
        set.register(a.clone());
        set.register(b.clone());
        set.register(c.clone());
        let ids: Vec<u64> = set.snapshot().iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec![a.id(), b.id(), c.id()]);
    }
}
