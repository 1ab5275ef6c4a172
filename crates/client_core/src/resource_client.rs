use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{cookie::Jar, header::CONTENT_TYPE, Client, Method, Response};
use serde::Serialize;
use shared::{
    domain::{Expense, ExpenseId},
    error::message_from_body,
    protocol::{
        AttachFileRequest, CreateExpenseRequest, ExpenseListResponse, ExpenseResponse,
        HealthResponse, SignUploadRequest, SignUploadResponse,
    },
};
use tracing::debug;
use url::Url;

use crate::{config::ClientSettings, error::RequestError, validation::ExpenseDraft};

/// Remote expense service as seen by the core.
#[async_trait]
pub trait ExpenseApi: Send + Sync {
    async fn list_expenses(&self) -> Result<Vec<Expense>, RequestError>;
    async fn get_expense(&self, id: ExpenseId) -> Result<Expense, RequestError>;
    async fn create_expense(&self, draft: &ExpenseDraft) -> Result<Expense, RequestError>;
    async fn delete_expense(&self, id: ExpenseId) -> Result<(), RequestError>;
    async fn sign_upload(
        &self,
        request: &SignUploadRequest,
    ) -> Result<SignUploadResponse, RequestError>;
    async fn attach_file(&self, id: ExpenseId, file_key: &str) -> Result<(), RequestError>;
    async fn health(&self) -> Result<HealthResponse, RequestError>;
}

/// Direct writes to object storage through a signed target.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        upload_url: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<(), RequestError>;
}

pub struct HttpResourceClient {
    api: Client,
    storage: Client,
    base_url: Url,
}

impl HttpResourceClient {
    pub fn new(settings: &ClientSettings) -> Result<Self, RequestError> {
        let base_url = normalize_base_url(&settings.api_base_url)?;

        let jar = Arc::new(Jar::default());
        if let Some(cookie) = &settings.session_cookie {
            for pair in cookie.split(';').map(str::trim).filter(|p| !p.is_empty()) {
                jar.add_cookie_str(pair, &base_url);
            }
        }

        let api = Client::builder().cookie_provider(jar).build()?;
        // Signed targets live on a foreign origin and must not see session cookies.
        let storage = Client::builder().build()?;

        Ok(Self {
            api,
            storage,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, RequestError> {
        Ok(self.base_url.join(path)?)
    }

    async fn call<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response, RequestError>
    where
        B: Serialize + ?Sized + Sync,
    {
        let url = self.endpoint(path)?;
        debug!(%method, %url, "expense api call");
        let mut request = self.api.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        ensure_success(request.send().await?).await
    }
}

fn normalize_base_url(raw: &str) -> Result<Url, RequestError> {
    let mut url = Url::parse(raw.trim())?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

async fn ensure_success(response: Response) -> Result<Response, RequestError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RequestError::Status {
        status: status.as_u16(),
        message: message_from_body(&body).unwrap_or_default(),
    })
}

#[async_trait]
impl ExpenseApi for HttpResourceClient {
    async fn list_expenses(&self) -> Result<Vec<Expense>, RequestError> {
        let response: ExpenseListResponse = self
            .call::<()>(Method::GET, "expenses", None)
            .await?
            .json()
            .await?;
        Ok(response.expenses)
    }

    async fn get_expense(&self, id: ExpenseId) -> Result<Expense, RequestError> {
        let response: ExpenseResponse = self
            .call::<()>(Method::GET, &format!("expenses/{id}"), None)
            .await?
            .json()
            .await?;
        Ok(response.expense)
    }

    async fn create_expense(&self, draft: &ExpenseDraft) -> Result<Expense, RequestError> {
        let body = CreateExpenseRequest {
            title: draft.title.clone(),
            amount: draft.amount,
        };
        let response: ExpenseResponse = self
            .call(Method::POST, "expenses", Some(&body))
            .await?
            .json()
            .await?;
        Ok(response.expense)
    }

    async fn delete_expense(&self, id: ExpenseId) -> Result<(), RequestError> {
        self.call::<()>(Method::DELETE, &format!("expenses/{id}"), None)
            .await?;
        Ok(())
    }

    async fn sign_upload(
        &self,
        request: &SignUploadRequest,
    ) -> Result<SignUploadResponse, RequestError> {
        Ok(self
            .call(Method::POST, "upload/sign", Some(request))
            .await?
            .json()
            .await?)
    }

    async fn attach_file(&self, id: ExpenseId, file_key: &str) -> Result<(), RequestError> {
        let body = AttachFileRequest {
            file_key: file_key.to_string(),
        };
        self.call(Method::PUT, &format!("expenses/{id}"), Some(&body))
            .await?;
        Ok(())
    }

    async fn health(&self) -> Result<HealthResponse, RequestError> {
        // Served at the origin root, outside the API prefix.
        Ok(self
            .call::<()>(Method::GET, "/health", None)
            .await?
            .json()
            .await?)
    }
}

#[async_trait]
impl ObjectStore for HttpResourceClient {
    async fn put_object(
        &self,
        upload_url: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<(), RequestError> {
        let url = Url::parse(upload_url)?;
        debug!(host = url.host_str().unwrap_or_default(), size = bytes.len(), "storage put");
        let response = self
            .storage
            .put(url)
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/resource_client_tests.rs"]
mod tests;
