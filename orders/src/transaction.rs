//! Exchange order types and status state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use ratebook_common::{Currency, RatebookError, Result, TransactionId, UserId};
use ratebook_fx::Quote;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle state of an exchange order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Recorded, awaiting an administrator.
    Pending,
    /// Accepted. Terminal.
    Completed,
    /// Declined. Terminal.
    Rejected,
}

/// What a status update does to the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Write the new status.
    Apply,
    /// Same terminal status re-applied; leave the record as is.
    Unchanged,
}

impl TransactionStatus {
    /// Check if this is a final state.
    pub fn is_final(&self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Rejected)
    }

    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[TransactionStatus] {
        match self {
            TransactionStatus::Pending => {
                &[TransactionStatus::Completed, TransactionStatus::Rejected]
            }
            TransactionStatus::Completed => &[],
            TransactionStatus::Rejected => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Decide how an update to `next` applies to a record currently in `self`.
    pub fn resolve(&self, next: TransactionStatus) -> Result<Transition> {
        if !next.is_final() {
            return Err(RatebookError::InvalidArgument(format!(
                "status must be completed or rejected, got {}",
                next
            )));
        }
        if *self == next {
            return Ok(Transition::Unchanged);
        }
        if self.can_transition_to(next) {
            return Ok(Transition::Apply);
        }
        Err(RatebookError::InvalidState(format!(
            "cannot move transaction from {} to {}",
            self, next
        )))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = RatebookError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "rejected" => Ok(TransactionStatus::Rejected),
            other => Err(RatebookError::InvalidArgument(format!(
                "unknown transaction status: {}",
                other
            ))),
        }
    }
}

/// A recorded exchange order.
///
/// Amounts and rate are a snapshot taken at creation and never change.
/// Only `status`, `admin_notes` and `payment_proof` move afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub from_currency: Currency,
    pub to_currency: Currency,
    pub from_amount: Decimal,
    pub to_amount: Decimal,
    /// Rate the order was priced at, spread already applied.
    pub exchange_rate: Decimal,
    pub status: TransactionStatus,
    /// Reference to the user's proof of payment.
    pub payment_proof: Option<String>,
    pub admin_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Snapshot for a transaction about to be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub from_currency: Currency,
    pub to_currency: Currency,
    pub from_amount: Decimal,
    pub to_amount: Decimal,
    pub exchange_rate: Decimal,
}

impl NewTransaction {
    /// Take the snapshot from a quote.
    pub fn from_quote(user_id: UserId, quote: &Quote) -> Self {
        Self {
            user_id,
            from_currency: quote.pair.from.clone(),
            to_currency: quote.pair.to.clone(),
            from_amount: quote.from_amount,
            to_amount: quote.to_amount,
            exchange_rate: quote.exchange_rate,
        }
    }

    /// Materialise as a pending transaction.
    pub fn into_pending(self, id: TransactionId, now: DateTime<Utc>) -> Transaction {
        Transaction {
            id,
            user_id: self.user_id,
            from_currency: self.from_currency,
            to_currency: self.to_currency,
            from_amount: self.from_amount,
            to_amount: self.to_amount,
            exchange_rate: self.exchange_rate,
            status: TransactionStatus::Pending,
            payment_proof: None,
            admin_notes: None,
            created_at: now,
            updated_at: now,
        }
    }
}
