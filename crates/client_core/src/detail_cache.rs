use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use shared::domain::{Expense, ExpenseId};
use tracing::{debug, warn};

use crate::{error::RequestError, resource_client::ExpenseApi};

#[derive(Default)]
struct Entries {
    loaded: HashMap<ExpenseId, Expense>,
    /// Ids a caller has looked at; only these are refetched on invalidation.
    /// An id is dropped once the server answers 404 for it.
    tracked: HashMap<ExpenseId, u64>,
}

/// Per-expense snapshots, kept apart from the list.
pub struct DetailCache {
    api: Arc<dyn ExpenseApi>,
    entries: Mutex<Entries>,
}

impl DetailCache {
    pub fn new(api: Arc<dyn ExpenseApi>) -> Arc<Self> {
        Arc::new(Self {
            api,
            entries: Mutex::new(Entries::default()),
        })
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn read(&self, id: ExpenseId) -> Option<Expense> {
        self.entries().loaded.get(&id).cloned()
    }

    pub fn is_tracked(&self, id: ExpenseId) -> bool {
        self.entries().tracked.contains_key(&id)
    }

    pub async fn load(&self, id: ExpenseId) -> Result<Expense, RequestError> {
        let generation = {
            let mut entries = self.entries();
            let generation = entries.tracked.entry(id).or_insert(0);
            *generation += 1;
            *generation
        };
        let result = self.api.get_expense(id).await;
        let mut entries = self.entries();
        let current = entries.tracked.get(&id) == Some(&generation);
        match &result {
            Ok(expense) if current => {
                entries.loaded.insert(id, expense.clone());
            }
            Err(err) if current && err.status() == Some(404) => {
                debug!(%id, "expense is gone, no longer tracking it");
                entries.loaded.remove(&id);
                entries.tracked.remove(&id);
            }
            _ => {}
        }
        result
    }

    /// Drops the cached entry and refetches it in the background if tracked.
    pub fn invalidate(self: &Arc<Self>, id: ExpenseId) {
        let tracked = {
            let mut entries = self.entries();
            entries.loaded.remove(&id);
            entries.tracked.contains_key(&id)
        };
        if !tracked {
            return;
        }
        debug!(%id, "refetching expense detail");
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = cache.load(id).await {
                warn!(%id, error = %err, "expense detail refresh failed");
            }
        });
    }
}
