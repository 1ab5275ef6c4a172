use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use shared::{domain::ExpenseId, protocol::SignUploadRequest};
use tokio::sync::watch;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    cache::ListCacheStore,
    detail_cache::DetailCache,
    error::{RequestError, UploadError, UploadStage, ValidationError},
    resource_client::{ExpenseApi, ObjectStore},
};

pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// A file the user picked, with the content type it declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// Reads the file and guesses its declared type from the extension.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let content_type = mime_guess::from_path(path)
            .first()
            .map(|mime| mime.essence_str().to_string())
            .unwrap_or_default();
        Ok(Self::new(name, content_type, bytes))
    }

    /// The type sent both when signing and when uploading.
    pub fn declared_content_type(&self) -> &str {
        let declared = self.content_type.trim();
        if declared.is_empty() {
            FALLBACK_CONTENT_TYPE
        } else {
            declared
        }
    }
}

/// One-time storage target handed out by the sign step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub target_url: String,
    pub storage_key: String,
    pub content_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    Signing,
    UploadingToStore,
    Confirming,
    Done,
    Aborted(UploadStage),
}

impl UploadState {
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            Self::Signing | Self::UploadingToStore | Self::Confirming
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub attempt_id: Uuid,
    pub expense_id: ExpenseId,
    pub storage_key: String,
}

/// Drives sign → store upload → confirm for attaching a file to an expense.
///
/// Steps run at most once per call and are never retried or compensated: a
/// failure after the store upload leaves an unlinked object behind.
pub struct UploadProtocolClient {
    api: Arc<dyn ExpenseApi>,
    storage: Arc<dyn ObjectStore>,
    list: Arc<ListCacheStore>,
    details: Arc<DetailCache>,
}

impl UploadProtocolClient {
    pub fn new(
        api: Arc<dyn ExpenseApi>,
        storage: Arc<dyn ObjectStore>,
        list: Arc<ListCacheStore>,
        details: Arc<DetailCache>,
    ) -> Self {
        Self {
            api,
            storage,
            list,
            details,
        }
    }

    pub async fn upload(
        &self,
        expense_id: ExpenseId,
        file: &SelectedFile,
    ) -> Result<UploadReceipt, UploadError> {
        self.upload_with(expense_id, file, |_| {}).await
    }

    /// Like [`upload`](Self::upload), reporting every state transition.
    pub async fn upload_with<F>(
        &self,
        expense_id: ExpenseId,
        file: &SelectedFile,
        observe: F,
    ) -> Result<UploadReceipt, UploadError>
    where
        F: FnMut(UploadState) + Send,
    {
        let attempt_id = Uuid::new_v4();
        let span = info_span!("upload", %attempt_id, %expense_id, file = %file.name);
        let mut attempt = UploadAttempt {
            client: self,
            expense_id,
            attempt_id,
            observe,
        };
        attempt.run(file).instrument(span).await
    }
}

struct UploadAttempt<'a, F> {
    client: &'a UploadProtocolClient,
    expense_id: ExpenseId,
    attempt_id: Uuid,
    observe: F,
}

impl<F> UploadAttempt<'_, F>
where
    F: FnMut(UploadState) + Send,
{
    fn enter(&mut self, state: UploadState) {
        (self.observe)(state);
    }

    fn abort(&mut self, stage: UploadStage, cause: &RequestError) -> UploadError {
        warn!(%stage, error = %cause, "upload aborted");
        self.enter(UploadState::Aborted(stage));
        UploadError::aborted(stage, cause)
    }

    async fn run(&mut self, file: &SelectedFile) -> Result<UploadReceipt, UploadError> {
        let session = self.sign(file).await?;
        self.upload_to_store(&session, file).await?;
        self.confirm(&session).await?;
        self.finish();
        Ok(UploadReceipt {
            attempt_id: self.attempt_id,
            expense_id: self.expense_id,
            storage_key: session.storage_key,
        })
    }

    async fn sign(&mut self, file: &SelectedFile) -> Result<UploadSession, UploadError> {
        self.enter(UploadState::Signing);
        let content_type = file.declared_content_type().to_string();
        let request = SignUploadRequest {
            filename: file.name.clone(),
            content_type: content_type.clone(),
        };
        let result = self.client.api.sign_upload(&request).await;
        match result {
            Ok(signed) => {
                info!(key = %signed.key, "upload target issued");
                Ok(UploadSession {
                    target_url: signed.upload_url,
                    storage_key: signed.key,
                    content_type,
                })
            }
            Err(err) => Err(self.abort(UploadStage::Signing, &err)),
        }
    }

    async fn upload_to_store(
        &mut self,
        session: &UploadSession,
        file: &SelectedFile,
    ) -> Result<(), UploadError> {
        self.enter(UploadState::UploadingToStore);
        let result = self
            .client
            .storage
            .put_object(
                &session.target_url,
                &session.content_type,
                file.bytes.clone(),
            )
            .await;
        match result {
            Ok(()) => {
                info!(size = file.bytes.len(), "uploaded to storage");
                Ok(())
            }
            Err(err) => Err(self.abort(UploadStage::UploadingToStore, &err)),
        }
    }

    async fn confirm(&mut self, session: &UploadSession) -> Result<(), UploadError> {
        self.enter(UploadState::Confirming);
        let result = self
            .client
            .api
            .attach_file(self.expense_id, &session.storage_key)
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(key = %session.storage_key, "stored object left unlinked");
                Err(self.abort(UploadStage::Confirming, &err))
            }
        }
    }

    fn finish(&mut self) {
        self.client.list.invalidate();
        self.client.details.invalidate(self.expense_id);
        info!("upload confirmed");
        self.enter(UploadState::Done);
    }
}

/// UI-facing state of the receipt form for one expense.
///
/// All methods take `&self`, so a view can poll `is_uploading` or hold a
/// `subscribe` receiver while `submit` is running.
pub struct UploadForm {
    expense_id: ExpenseId,
    selected: Mutex<Option<SelectedFile>>,
    state: watch::Sender<UploadState>,
    error: Mutex<Option<String>>,
}

impl UploadForm {
    pub fn new(expense_id: ExpenseId) -> Self {
        let (state, _) = watch::channel(UploadState::Idle);
        Self {
            expense_id,
            selected: Mutex::new(None),
            state,
            error: Mutex::new(None),
        }
    }

    pub fn expense_id(&self) -> ExpenseId {
        self.expense_id
    }

    pub fn choose(&self, file: SelectedFile) {
        *lock(&self.error) = None;
        *lock(&self.selected) = Some(file);
    }

    pub fn clear(&self) {
        *lock(&self.selected) = None;
    }

    pub fn selected(&self) -> Option<SelectedFile> {
        lock(&self.selected).clone()
    }

    pub fn state(&self) -> UploadState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadState> {
        self.state.subscribe()
    }

    pub fn is_uploading(&self) -> bool {
        self.state().is_in_progress()
    }

    pub fn error(&self) -> Option<String> {
        lock(&self.error).clone()
    }

    /// Uploads the selected file. Clears the selection on success and keeps
    /// it on failure so the user can resubmit.
    pub async fn submit(&self, client: &UploadProtocolClient) -> Result<UploadReceipt, UploadError> {
        *lock(&self.error) = None;
        let Some(file) = self.selected() else {
            let err = UploadError::from(ValidationError::MissingFile);
            *lock(&self.error) = Some(err.to_string());
            return Err(err);
        };

        let result = client
            .upload_with(self.expense_id, &file, |next| {
                self.state.send_replace(next);
            })
            .await;

        match &result {
            Ok(_) => self.clear(),
            Err(err) => *lock(&self.error) = Some(err.to_string()),
        }
        result
    }
}

fn lock<T>(slot: &Mutex<T>) -> MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "tests/upload_tests.rs"]
mod tests;
