use std::fmt;

use thiserror::Error;

/// Input rejected on the client before any request is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Title is required")]
    EmptyTitle,
    #[error("Amount is required")]
    MissingAmount,
    #[error("Amount must be a positive whole number")]
    InvalidAmount,
    #[error("Please choose a file first.")]
    MissingFile,
}

#[derive(Debug, Error)]
pub enum RequestError {
    /// The server answered with a non-success status. `message` is the text
    /// extracted from the body and may be empty.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid request url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl RequestError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(err) => err.status().map(|s| s.as_u16()),
            Self::InvalidUrl(_) => None,
        }
    }

    /// Human-readable message: the server's own text when it sent one,
    /// otherwise `fallback`.
    pub fn message_or(&self, fallback: &str) -> String {
        match self {
            Self::Status { message, .. } if !message.is_empty() => message.clone(),
            Self::Status { .. } => fallback.to_string(),
            Self::Transport(err) => err.to_string(),
            Self::InvalidUrl(err) => err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Delete,
}

impl MutationKind {
    pub fn fallback_message(self) -> &'static str {
        match self {
            Self::Create => "Failed to add expense",
            Self::Delete => "Failed to delete expense",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MutationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{message}")]
    Rejected {
        operation: MutationKind,
        message: String,
    },
}

impl MutationError {
    pub(crate) fn rejected(operation: MutationKind, err: &RequestError) -> Self {
        Self::Rejected {
            operation,
            message: err.message_or(operation.fallback_message()),
        }
    }
}

/// Step at which an upload attempt stopped. Doubles as the abort reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Signing,
    UploadingToStore,
    Confirming,
}

impl UploadStage {
    pub fn reason(self) -> &'static str {
        match self {
            Self::Signing => "could not obtain upload target",
            Self::UploadingToStore => "upload to storage failed",
            Self::Confirming => "could not record uploaded file",
        }
    }
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{message}")]
    Aborted { stage: UploadStage, message: String },
}

impl UploadError {
    pub(crate) fn aborted(stage: UploadStage, err: &RequestError) -> Self {
        let fallback = match err.status() {
            Some(status) => format!("{} (HTTP {status})", stage.reason()),
            None => stage.reason().to_string(),
        };
        Self::Aborted {
            stage,
            message: err.message_or(&fallback),
        }
    }

    pub fn stage(&self) -> Option<UploadStage> {
        match self {
            Self::Validation(_) => None,
            Self::Aborted { stage, .. } => Some(*stage),
        }
    }
}

/// The list could not be loaded.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ListError {
    pub message: String,
}

impl From<&RequestError> for ListError {
    fn from(err: &RequestError) -> Self {
        let message = match err {
            RequestError::Status { status, message } => {
                let detail = if message.is_empty() {
                    reqwest::StatusCode::from_u16(*status)
                        .ok()
                        .and_then(|s| s.canonical_reason())
                        .unwrap_or("request failed")
                        .to_string()
                } else {
                    message.clone()
                };
                format!("HTTP {status}: {detail}")
            }
            other => other.to_string(),
        };
        Self { message }
    }
}

impl From<RequestError> for ListError {
    fn from(err: RequestError) -> Self {
        Self::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_mutation_prefers_body_text() {
        let err = RequestError::Status {
            status: 400,
            message: "Title too long".into(),
        };
        let mutation = MutationError::rejected(MutationKind::Create, &err);
        assert_eq!(mutation.to_string(), "Title too long");
    }

    #[test]
    fn rejected_mutation_falls_back_on_empty_body() {
        let err = RequestError::Status {
            status: 500,
            message: String::new(),
        };
        assert_eq!(
            MutationError::rejected(MutationKind::Delete, &err).to_string(),
            "Failed to delete expense"
        );
    }

    #[test]
    fn aborted_upload_fallback_names_stage_and_status() {
        let err = RequestError::Status {
            status: 403,
            message: String::new(),
        };
        let upload = UploadError::aborted(UploadStage::UploadingToStore, &err);
        assert_eq!(upload.stage(), Some(UploadStage::UploadingToStore));
        assert_eq!(upload.to_string(), "upload to storage failed (HTTP 403)");
    }

    #[test]
    fn list_error_uses_reason_phrase_without_body() {
        let err = RequestError::Status {
            status: 503,
            message: String::new(),
        };
        assert_eq!(
            ListError::from(err).to_string(),
            "HTTP 503: Service Unavailable"
        );
    }
}
