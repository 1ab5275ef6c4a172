use serde::Deserialize;

/// JSON error envelopes the expense API may answer with instead of plain text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    fn into_message(self) -> Option<String> {
        self.message
            .or(self.error)
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
    }
}

/// Extracts a human-readable message from a failed response body.
///
/// JSON envelopes with an `error` or `message` field yield that field; any
/// other non-blank body is used verbatim. Blank bodies and JSON without a
/// usable field yield `None` so callers can substitute their own fallback.
pub fn message_from_body(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.starts_with('{') {
        return serde_json::from_str::<ErrorBody>(trimmed)
            .ok()
            .and_then(ErrorBody::into_message);
    }

    Some(trimmed.to_string())
}
