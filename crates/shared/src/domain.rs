use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(ExpenseId);

impl ExpenseId {
    /// Server-issued ids are always positive; anything else was minted locally.
    pub fn is_provisional(self) -> bool {
        self.0 <= 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("amount must be a positive whole number, got {0}")]
pub struct NonPositiveAmount(pub i64);

/// A positive whole amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(u64);

impl Amount {
    pub fn new(value: u64) -> Option<Self> {
        (value > 0 && value <= i64::MAX as u64).then_some(Self(value))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl TryFrom<i64> for Amount {
    type Error = NonPositiveAmount;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value > 0 {
            Ok(Self(value as u64))
        } else {
            Err(NonPositiveAmount(value))
        }
    }
}

impl From<Amount> for i64 {
    fn from(value: Amount) -> Self {
        // Construction keeps the value within i64 range.
        value.0 as i64
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: ExpenseId,
    pub title: String,
    pub amount: Amount,
    #[serde(default)]
    pub file_url: Option<String>,
}

impl Expense {
    pub fn has_receipt(&self) -> bool {
        self.file_url.is_some()
    }
}
