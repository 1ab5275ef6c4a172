use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use shared::domain::{Expense, ExpenseId};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::{
    cache::ListCacheStore,
    config::ClientSettings,
    error::{MutationError, MutationKind},
    resource_client::ExpenseApi,
    validation::ExpenseDraft,
};

/// Runs create/delete mutations with optimistic cache writes.
///
/// Every mutation follows the same sequence: cancel pending refresh and
/// capture the current snapshot, write the predicted result, call the
/// server, then commit or roll back and schedule a refresh.
pub struct MutationCoordinator {
    api: Arc<dyn ExpenseApi>,
    store: Arc<ListCacheStore>,
    /// FIFO turnstile so a mutation's rollback target is never another
    /// mutation's unsettled optimistic state.
    queue: Option<Mutex<()>>,
    placeholder_ids: AtomicI64,
}

impl MutationCoordinator {
    pub fn new(
        api: Arc<dyn ExpenseApi>,
        store: Arc<ListCacheStore>,
        settings: &ClientSettings,
    ) -> Self {
        Self {
            api,
            store,
            queue: settings.serialize_mutations.then(|| Mutex::new(())),
            placeholder_ids: AtomicI64::new(0),
        }
    }

    /// Server ids are positive, so counting down from -1 never collides.
    fn next_placeholder_id(&self) -> ExpenseId {
        ExpenseId(self.placeholder_ids.fetch_sub(1, Ordering::Relaxed) - 1)
    }

    async fn turn(&self) -> Option<MutexGuard<'_, ()>> {
        match &self.queue {
            Some(queue) => Some(queue.lock().await),
            None => None,
        }
    }

    /// Validates raw form input, then creates the expense.
    pub async fn create(&self, title: &str, amount: &str) -> Result<Expense, MutationError> {
        let draft = ExpenseDraft::parse(title, amount)?;
        self.create_draft(draft).await
    }

    pub async fn create_draft(&self, draft: ExpenseDraft) -> Result<Expense, MutationError> {
        let _turn = self.turn().await;

        let mut tx = self.store.begin();
        let provisional = Expense {
            id: self.next_placeholder_id(),
            title: draft.title.clone(),
            amount: draft.amount,
            file_url: None,
        };
        let placeholder = provisional.id;
        let optimistic = tx.apply(|snapshot| snapshot.with_appended(provisional));
        info!(%placeholder, optimistic, "create mutation started");

        let result = self.api.create_expense(&draft).await;
        let outcome = match result {
            Ok(expense) => {
                tx.commit();
                info!(id = %expense.id, %placeholder, "create mutation committed");
                Ok(expense)
            }
            Err(err) => {
                tx.rollback();
                warn!(%placeholder, error = %err, "create mutation rolled back");
                Err(MutationError::rejected(MutationKind::Create, &err))
            }
        };

        self.store.invalidate();
        outcome
    }

    pub async fn delete(&self, id: ExpenseId) -> Result<(), MutationError> {
        let _turn = self.turn().await;

        let mut tx = self.store.begin();
        let optimistic = tx.apply(|snapshot| snapshot.without(id));
        info!(%id, optimistic, "delete mutation started");

        let outcome = match self.api.delete_expense(id).await {
            Ok(()) => {
                tx.commit();
                info!(%id, "delete mutation committed");
                Ok(())
            }
            Err(err) => {
                tx.rollback();
                warn!(%id, error = %err, "delete mutation rolled back");
                Err(MutationError::rejected(MutationKind::Delete, &err))
            }
        };

        self.store.invalidate();
        outcome
    }
}

#[cfg(test)]
#[path = "tests/mutation_tests.rs"]
mod tests;
