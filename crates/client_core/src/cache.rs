use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use shared::domain::{Expense, ExpenseId};
use tokio::{sync::watch, task::JoinHandle};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::{
    config::ClientSettings,
    error::{ListError, RequestError},
    resource_client::ExpenseApi,
};

const REFRESH_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Immutable, ordered view of the expense list at one point in time.
///
/// Cloning is cheap and never copies the entries; deriving a new snapshot
/// always allocates a fresh list so earlier snapshots stay intact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSnapshot {
    expenses: Arc<[Expense]>,
}

impl ListSnapshot {
    pub fn new(expenses: Vec<Expense>) -> Self {
        Self {
            expenses: expenses.into(),
        }
    }

    pub fn expenses(&self) -> &[Expense] {
        &self.expenses
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Expense> {
        self.expenses.iter()
    }

    pub fn len(&self) -> usize {
        self.expenses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expenses.is_empty()
    }

    pub fn get(&self, id: ExpenseId) -> Option<&Expense> {
        self.expenses.iter().find(|e| e.id == id)
    }

    pub fn contains(&self, id: ExpenseId) -> bool {
        self.get(id).is_some()
    }

    pub fn with_appended(&self, expense: Expense) -> Self {
        let mut expenses = self.expenses.to_vec();
        expenses.push(expense);
        Self::new(expenses)
    }

    pub fn without(&self, id: ExpenseId) -> Self {
        Self::new(
            self.expenses
                .iter()
                .filter(|e| e.id != id)
                .cloned()
                .collect(),
        )
    }
}

impl Default for ListSnapshot {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl From<Vec<Expense>> for ListSnapshot {
    fn from(expenses: Vec<Expense>) -> Self {
        Self::new(expenses)
    }
}

/// Where authoritative snapshots come from when the cache refreshes.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<ListSnapshot, RequestError>;
}

pub struct ApiListSource(pub Arc<dyn ExpenseApi>);

#[async_trait]
impl SnapshotSource for ApiListSource {
    async fn fetch_snapshot(&self) -> Result<ListSnapshot, RequestError> {
        Ok(ListSnapshot::new(self.0.list_expenses().await?))
    }
}

#[derive(Default)]
struct RefreshState {
    /// Bumped on every cancel/invalidate; a refresh may only publish its
    /// result while the generation it was started with is still current.
    generation: u64,
    invalidated: bool,
    fetched_at: Option<Instant>,
    pending: Option<JoinHandle<()>>,
    last_error: Option<ListError>,
}

/// Holds the single authoritative snapshot of the expense list.
pub struct ListCacheStore {
    source: Arc<dyn SnapshotSource>,
    snapshot: watch::Sender<Option<ListSnapshot>>,
    refresh: Mutex<RefreshState>,
    stale_after: Duration,
    refresh_retries: u32,
}

impl ListCacheStore {
    pub fn new(source: Arc<dyn SnapshotSource>, settings: &ClientSettings) -> Arc<Self> {
        Self::with_options(source, settings.stale_after, settings.refresh_retries)
    }

    pub fn with_options(
        source: Arc<dyn SnapshotSource>,
        stale_after: Duration,
        refresh_retries: u32,
    ) -> Arc<Self> {
        let (snapshot, _) = watch::channel(None);
        Arc::new(Self {
            source,
            snapshot,
            refresh: Mutex::new(RefreshState::default()),
            stale_after,
            refresh_retries,
        })
    }

    fn state(&self) -> MutexGuard<'_, RefreshState> {
        self.refresh.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn read(&self) -> Option<ListSnapshot> {
        self.snapshot.borrow().clone()
    }

    /// Overwrites the whole snapshot and notifies subscribers before returning.
    pub fn replace(&self, snapshot: ListSnapshot) {
        let _state = self.state();
        self.snapshot.send_replace(Some(snapshot));
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ListSnapshot>> {
        self.snapshot.subscribe()
    }

    pub fn updates(&self) -> WatchStream<Option<ListSnapshot>> {
        WatchStream::new(self.subscribe())
    }

    /// Prevents any refresh already in flight from publishing its result.
    /// Returns whether a refresh was pending.
    pub fn cancel_pending_refresh(&self) -> bool {
        let mut state = self.state();
        state.generation += 1;
        match state.pending.take() {
            Some(handle) => {
                handle.abort();
                debug!(generation = state.generation, "cancelled pending refresh");
                true
            }
            None => false,
        }
    }

    /// Marks the snapshot stale and schedules a background refetch.
    pub fn invalidate(self: &Arc<Self>) {
        let mut state = self.state();
        state.invalidated = true;
        state.generation += 1;
        if let Some(superseded) = state.pending.take() {
            superseded.abort();
        }
        let generation = state.generation;
        let store = Arc::clone(self);
        state.pending = Some(tokio::spawn(async move {
            store.run_refresh(generation).await;
        }));
        debug!(generation, "scheduled list refresh");
    }

    async fn run_refresh(&self, generation: u64) {
        match self.fetch_with_retries(generation).await {
            Some(Ok(snapshot)) => {
                self.publish(generation, snapshot);
            }
            Some(Err(err)) => {
                let mut state = self.state();
                if state.generation == generation {
                    warn!(error = %err, "list refresh failed");
                    state.last_error = Some(ListError::from(err));
                    state.pending = None;
                }
            }
            None => debug!(generation, "refresh superseded before completion"),
        }
    }

    /// `None` once the attempt has been superseded by a newer generation.
    async fn fetch_with_retries(
        &self,
        generation: u64,
    ) -> Option<Result<ListSnapshot, RequestError>> {
        let mut attempt = 0;
        loop {
            let result = self.source.fetch_snapshot().await;
            if self.state().generation != generation {
                return None;
            }
            match result {
                Ok(snapshot) => return Some(Ok(snapshot)),
                Err(err) if attempt < self.refresh_retries => {
                    attempt += 1;
                    debug!(attempt, error = %err, "retrying list refresh");
                    tokio::time::sleep(REFRESH_RETRY_DELAY * attempt).await;
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }

    fn publish(&self, generation: u64, snapshot: ListSnapshot) -> bool {
        let mut state = self.state();
        if state.generation != generation {
            debug!(generation, "discarding stale refresh result");
            return false;
        }
        info!(entries = snapshot.len(), "list snapshot refreshed");
        self.snapshot.send_replace(Some(snapshot));
        state.invalidated = false;
        state.fetched_at = Some(Instant::now());
        state.last_error = None;
        state.pending = None;
        true
    }

    /// Fetches immediately, superseding any scheduled refresh.
    pub async fn refresh_now(&self) -> Result<ListSnapshot, ListError> {
        let generation = {
            let mut state = self.state();
            state.generation += 1;
            if let Some(superseded) = state.pending.take() {
                superseded.abort();
            }
            state.generation
        };
        match self.fetch_with_retries(generation).await {
            Some(Ok(snapshot)) => {
                self.publish(generation, snapshot.clone());
                Ok(snapshot)
            }
            Some(Err(err)) => {
                let err = ListError::from(err);
                self.state().last_error = Some(err.clone());
                Err(err)
            }
            // Someone else replaced the cache meanwhile; their state wins.
            None => self.read().ok_or_else(|| ListError {
                message: "refresh was cancelled".into(),
            }),
        }
    }

    /// Returns the cached snapshot, refetching first if it is stale.
    pub async fn ensure_fresh(&self) -> Result<ListSnapshot, ListError> {
        match self.read() {
            Some(snapshot) if !self.is_stale() => Ok(snapshot),
            _ => self.refresh_now().await,
        }
    }

    pub fn is_stale(&self) -> bool {
        if self.snapshot.borrow().is_none() {
            return true;
        }
        let state = self.state();
        state.invalidated
            || state
                .fetched_at
                .map_or(true, |at| at.elapsed() >= self.stale_after)
    }

    pub fn is_refreshing(&self) -> bool {
        self.state()
            .pending
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn last_refresh_error(&self) -> Option<ListError> {
        self.state().last_error.clone()
    }

    /// Waits until no background refresh is pending.
    pub async fn wait_for_refresh(&self) {
        loop {
            let Some(handle) = self.state().pending.take() else {
                return;
            };
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
#[path = "tests/cache_tests.rs"]
mod tests;
