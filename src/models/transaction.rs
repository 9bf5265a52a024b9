//! Transaction model
//!
//! Represents a single money movement on an account, optionally categorized.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::entity::{Entity, EntityKind};
use super::ids::{AccountId, CategoryId, TransactionId};
use super::money::Money;
use crate::error::{CipherbookError, CipherbookResult};

/// A financial transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique identifier
    pub id: TransactionId,

    /// The account this transaction belongs to
    pub account_id: AccountId,

    /// Transaction date
    pub date: NaiveDate,

    /// Amount (positive for inflow, negative for outflow)
    pub amount: Money,

    /// Category ID (None if uncategorized)
    #[serde(default)]
    pub category_id: Option<CategoryId>,

    /// Free-text label shown in lists
    #[serde(default)]
    pub name: String,

    /// Memo/notes
    #[serde(default)]
    pub memo: String,

    /// When the transaction was created
    pub created_at: DateTime<Utc>,

    /// When the transaction was last modified
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a new transaction
    pub fn new(account_id: AccountId, date: NaiveDate, amount: Money) -> Self {
        let now = Utc::now();
        Self {
            id: TransactionId::new(),
            account_id,
            date,
            amount,
            category_id: None,
            name: String::new(),
            memo: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder-style name setter
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Builder-style category setter
    pub fn in_category(mut self, category_id: CategoryId) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn is_outflow(&self) -> bool {
        self.amount.is_negative()
    }
}

impl Entity for Transaction {
    const KIND: EntityKind = EntityKind::Transaction;

    fn record_id(&self) -> String {
        self.id.wire()
    }

    /// Validate the transaction
    fn validate(&self) -> CipherbookResult<()> {
        if self.name.len() > 200 {
            return Err(CipherbookError::Validation(format!(
                "Transaction name too long ({} chars, max 200)",
                self.name.len()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.date, self.name, self.amount)
    }
}

/// Typed read criteria for the transaction repository
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub account_id: Option<AccountId>,
    pub category_id: Option<CategoryId>,
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
}

impl TransactionFilter {
    pub fn matches(&self, txn: &Transaction) -> bool {
        self.account_id.map_or(true, |id| txn.account_id == id)
            && self.category_id.map_or(true, |id| txn.category_id == Some(id))
            && self.since.map_or(true, |d| txn.date >= d)
            && self.until.map_or(true, |d| txn.date <= d)
    }
}
