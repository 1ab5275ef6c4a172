use tracing::debug;

use crate::cache::{ListCacheStore, ListSnapshot};

/// Optimistic write against the list cache that can be undone.
///
/// `begin` cancels any pending refresh before capturing the prior snapshot,
/// so a refresh already in flight can never land on top of the optimistic
/// state. A transaction dropped without `commit` restores the captured
/// snapshot.
pub struct CacheTransaction<'a> {
    store: &'a ListCacheStore,
    previous: Option<ListSnapshot>,
    applied: bool,
    settled: bool,
}

impl ListCacheStore {
    pub fn begin(&self) -> CacheTransaction<'_> {
        self.cancel_pending_refresh();
        CacheTransaction {
            store: self,
            previous: self.read(),
            applied: false,
            settled: false,
        }
    }
}

impl CacheTransaction<'_> {
    pub fn previous(&self) -> Option<&ListSnapshot> {
        self.previous.as_ref()
    }

    /// Writes `f(previous)` into the cache. Does nothing when the cache had
    /// never been populated, since there is no baseline to predict from.
    pub fn apply(&mut self, f: impl FnOnce(&ListSnapshot) -> ListSnapshot) -> bool {
        let Some(previous) = &self.previous else {
            return false;
        };
        self.store.replace(f(previous));
        self.applied = true;
        true
    }

    pub fn is_applied(&self) -> bool {
        self.applied
    }

    pub fn commit(mut self) {
        self.settled = true;
    }

    pub fn rollback(mut self) {
        self.restore();
        self.settled = true;
    }

    fn restore(&mut self) {
        if let Some(previous) = self.previous.take() {
            debug!(entries = previous.len(), "restoring snapshot");
            self.store.replace(previous);
        }
    }
}

impl Drop for CacheTransaction<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.restore();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use async_trait::async_trait;

    use super::*;
    use crate::{cache::SnapshotSource, error::RequestError, tests_support::expense};

    struct EmptySource;

    #[async_trait]
    impl SnapshotSource for EmptySource {
        async fn fetch_snapshot(&self) -> Result<ListSnapshot, RequestError> {
            Ok(ListSnapshot::default())
        }
    }

    fn store() -> Arc<ListCacheStore> {
        ListCacheStore::with_options(Arc::new(EmptySource), Duration::from_secs(5), 0)
    }

    #[test]
    fn apply_without_baseline_is_skipped() {
        let store = store();
        let mut tx = store.begin();
        assert!(tx.previous().is_none());
        assert!(!tx.apply(|s| s.with_appended(expense(1, "Coffee", 4))));
        assert!(!tx.is_applied());
        tx.rollback();
        assert!(store.read().is_none());
    }

    #[test]
    fn rollback_restores_captured_snapshot() {
        let store = store();
        let original = ListSnapshot::new(vec![expense(1, "Coffee", 4)]);
        store.replace(original.clone());

        let mut tx = store.begin();
        assert_eq!(tx.previous(), Some(&original));
        assert!(tx.apply(|s| s.without(shared::domain::ExpenseId(1))));
        assert!(tx.is_applied());
        assert!(store.read().expect("snapshot").is_empty());
        assert_eq!(tx.previous(), Some(&original));
        tx.rollback();

        assert_eq!(store.read(), Some(original));
    }

    #[test]
    fn commit_keeps_optimistic_state() {
        let store = store();
        store.replace(ListSnapshot::new(vec![expense(1, "Coffee", 4)]));

        let mut tx = store.begin();
        tx.apply(|s| s.with_appended(expense(-1, "Lunch", 12)));
        tx.commit();

        assert_eq!(store.read().expect("snapshot").len(), 2);
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let store = store();
        let original = ListSnapshot::new(vec![expense(1, "Coffee", 4)]);
        store.replace(original.clone());
        {
            let mut tx = store.begin();
            tx.apply(|s| s.with_appended(expense(-1, "Lunch", 12)));
        }
        assert_eq!(store.read(), Some(original));
    }
}
