use shared::domain::Amount;

use crate::error::ValidationError;

/// Trims the title and rejects it if nothing is left.
pub fn validate_title(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    Ok(trimmed.to_string())
}

/// 2^63. `i64::MAX as f64` rounds up to this value, so it cannot be the bound.
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

/// Parses user-entered amount text.
///
/// Accepts any finite numeric literal with an integral, positive value, so
/// `"12"` and `"12.0"` both become 12 while `"3.5"`, `"0"` and `"-5"` are
/// rejected.
pub fn parse_amount(raw: &str) -> Result<Amount, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingAmount);
    }

    if let Ok(whole) = trimmed.parse::<i64>() {
        return Amount::try_from(whole).map_err(|_| ValidationError::InvalidAmount);
    }

    let value: f64 = trimmed
        .parse()
        .map_err(|_| ValidationError::InvalidAmount)?;
    if !value.is_finite() || value <= 0.0 || value.fract() != 0.0 || value >= I64_LIMIT {
        return Err(ValidationError::InvalidAmount);
    }
    Amount::try_from(value as i64).map_err(|_| ValidationError::InvalidAmount)
}

/// Validated `(title, amount)` pair ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpenseDraft {
    pub title: String,
    pub amount: Amount,
}

impl ExpenseDraft {
    /// Title is checked before amount only when the amount is present and
    /// well formed; a malformed amount is reported first.
    pub fn parse(title: &str, amount: &str) -> Result<Self, ValidationError> {
        let amount = match parse_amount(amount) {
            Err(ValidationError::InvalidAmount) => return Err(ValidationError::InvalidAmount),
            other => other,
        };
        let title = validate_title(title)?;
        Ok(Self {
            title,
            amount: amount?,
        })
    }

    pub fn new(title: &str, amount: Amount) -> Result<Self, ValidationError> {
        Ok(Self {
            title: validate_title(title)?,
            amount,
        })
    }
}
