use std::sync::Arc;

pub mod cache;
pub mod config;
pub mod detail_cache;
pub mod error;
pub mod mutation;
pub mod resource_client;
pub mod transaction;
pub mod upload;
pub mod validation;

pub use cache::{ApiListSource, ListCacheStore, ListSnapshot, SnapshotSource};
pub use config::{load_settings, load_settings_from, ClientSettings};
pub use detail_cache::DetailCache;
pub use error::{
    ListError, MutationError, MutationKind, RequestError, UploadError, UploadStage,
    ValidationError,
};
pub use mutation::MutationCoordinator;
pub use resource_client::{ExpenseApi, HttpResourceClient, ObjectStore};
pub use transaction::CacheTransaction;
pub use upload::{
    SelectedFile, UploadForm, UploadProtocolClient, UploadReceipt, UploadSession, UploadState,
    FALLBACK_CONTENT_TYPE,
};
pub use validation::{parse_amount, validate_title, ExpenseDraft};

/// Everything a front end needs, wired over one HTTP resource client.
pub struct ExpenseClient {
    pub api: Arc<HttpResourceClient>,
    pub list: Arc<ListCacheStore>,
    pub details: Arc<DetailCache>,
    pub mutations: MutationCoordinator,
    pub uploads: UploadProtocolClient,
}

impl ExpenseClient {
    pub fn connect(settings: &ClientSettings) -> Result<Self, RequestError> {
        let http = Arc::new(HttpResourceClient::new(settings)?);
        Ok(Self::with_http(http, settings))
    }

    pub fn with_http(http: Arc<HttpResourceClient>, settings: &ClientSettings) -> Self {
        let api: Arc<dyn ExpenseApi> = http.clone();
        let storage: Arc<dyn ObjectStore> = http.clone();
        let list = ListCacheStore::new(Arc::new(ApiListSource(Arc::clone(&api))), settings);
        let details = DetailCache::new(Arc::clone(&api));
        let mutations = MutationCoordinator::new(Arc::clone(&api), Arc::clone(&list), settings);
        let uploads = UploadProtocolClient::new(
            api,
            storage,
            Arc::clone(&list),
            Arc::clone(&details),
        );
        Self {
            api: http,
            list,
            details,
            mutations,
            uploads,
        }
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod tests_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
