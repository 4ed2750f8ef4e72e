//! Ledger entry types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use ratebook_common::{Currency, LedgerEntryId, RatebookError, Result, WalletId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Kind of balance-changing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// Credit to the wallet.
    Deposit,
    /// Debit from the wallet.
    Withdraw,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Deposit => "deposit",
            EntryType::Withdraw => "withdraw",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = RatebookError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "deposit" => Ok(EntryType::Deposit),
            "withdraw" => Ok(EntryType::Withdraw),
            other => Err(RatebookError::InvalidArgument(format!(
                "unknown ledger entry type: {}",
                other
            ))),
        }
    }
}

/// One immutable balance-changing event. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletLedgerEntry {
    /// Unique entry ID, increasing in commit order.
    pub id: LedgerEntryId,
    /// Wallet the entry belongs to.
    pub wallet_id: WalletId,
    pub entry_type: EntryType,
    pub currency: Currency,
    /// Always positive; direction comes from `entry_type`.
    pub amount: Decimal,
    /// Balance of `currency` immediately after this entry.
    pub balance_after: Decimal,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl WalletLedgerEntry {
    /// Get signed amount (positive for deposits, negative for withdrawals).
    pub fn signed_amount(&self) -> Decimal {
        match self.entry_type {
            EntryType::Deposit => self.amount,
            EntryType::Withdraw => -self.amount,
        }
    }
}

/// A requested change to one currency balance, not yet applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceMutation {
    pub entry_type: EntryType,
    pub currency: Currency,
    pub amount: Decimal,
    pub description: String,
}

impl BalanceMutation {
    pub fn deposit(currency: Currency, amount: Decimal, description: impl Into<String>) -> Self {
        Self {
            entry_type: EntryType::Deposit,
            currency,
            amount,
            description: description.into(),
        }
    }

    pub fn withdraw(currency: Currency, amount: Decimal, description: impl Into<String>) -> Self {
        Self {
            entry_type: EntryType::Withdraw,
            currency,
            amount,
            description: description.into(),
        }
    }

    /// Compute the balance after applying this mutation to `balance`.
    ///
    /// Fails with `InsufficientBalance` when a withdrawal exceeds `balance`,
    /// and with `InvalidArgument` when a deposit would overflow it.
    /// Must be evaluated inside the same critical section that writes the result.
    pub fn apply_to(&self, balance: Decimal) -> Result<Decimal> {
        match self.entry_type {
            EntryType::Deposit => balance.checked_add(self.amount).ok_or_else(|| {
                RatebookError::InvalidArgument(format!(
                    "deposit of {} would overflow the {} balance",
                    self.amount, self.currency
                ))
            }),
            EntryType::Withdraw => {
                if self.amount > balance {
                    return Err(RatebookError::InsufficientBalance {
                        currency: self.currency.clone(),
                        required: self.amount,
                        available: balance,
                    });
                }
                Ok(balance - self.amount)
            }
        }
    }

    /// Build the ledger entry recording this mutation.
    pub fn to_entry(
        &self,
        id: LedgerEntryId,
        wallet_id: WalletId,
        balance_after: Decimal,
        created_at: DateTime<Utc>,
    ) -> WalletLedgerEntry {
        WalletLedgerEntry {
            id,
            wallet_id,
            entry_type: self.entry_type,
            currency: self.currency.clone(),
            amount: self.amount,
            balance_after,
            description: self.description.clone(),
            created_at,
        }
    }
}

/// Replay entries from a zero balance, per currency.
pub fn reconstruct<'a, I>(entries: I) -> BTreeMap<Currency, Decimal>
where
    I: IntoIterator<Item = &'a WalletLedgerEntry>,
{
    let mut balances = BTreeMap::new();
    for entry in entries {
        *balances
            .entry(entry.currency.clone())
            .or_insert(Decimal::ZERO) += entry.signed_amount();
    }
    balances
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(id: i64, mutation: &BalanceMutation, after: Decimal) -> WalletLedgerEntry {
        mutation.to_entry(LedgerEntryId::new(id), WalletId::new(1), after, Utc::now())
    }

    #[test]
    fn test_entry_type_round_trips_as_lowercase() {
        assert_eq!("deposit".parse::<EntryType>().unwrap(), EntryType::Deposit);
        assert_eq!(EntryType::Withdraw.to_string(), "withdraw");
        assert!("refund".parse::<EntryType>().is_err());
        assert_eq!(
            serde_json::to_string(&EntryType::Deposit).unwrap(),
            "\"deposit\""
        );
    }

    #[test]
    fn test_withdraw_checks_balance() {
        let mutation = BalanceMutation::withdraw(Currency::bdt(), dec!(150), "cash out");

        let err = mutation.apply_to(dec!(100)).unwrap_err();
        assert_eq!(
            err,
            RatebookError::InsufficientBalance {
                currency: Currency::bdt(),
                required: dec!(150),
                available: dec!(100),
            }
        );
        assert_eq!(mutation.apply_to(dec!(150)).unwrap(), dec!(0));
    }

    #[test]
    fn test_deposit_overflow_is_rejected() {
        let mutation = BalanceMutation::deposit(Currency::bdt(), dec!(1), "top up");

        assert!(matches!(
            mutation.apply_to(Decimal::MAX),
            Err(RatebookError::InvalidArgument(_))
        ));
        assert_eq!(mutation.apply_to(dec!(99)).unwrap(), dec!(100));
    }

    #[test]
    fn test_reconstruct_sums_signed_amounts() {
        let deposit = BalanceMutation::deposit(Currency::bdt(), dec!(100), "top up");
        let withdraw = BalanceMutation::withdraw(Currency::bdt(), dec!(40), "cash out");
        let inr = BalanceMutation::deposit(Currency::inr(), dec!(12.50), "top up");

        let entries = vec![
            entry(1, &deposit, dec!(100)),
            entry(2, &withdraw, dec!(60)),
            entry(3, &inr, dec!(12.50)),
        ];
        let balances = reconstruct(&entries);

        assert_eq!(balances[&Currency::bdt()], dec!(60));
        assert_eq!(balances[&Currency::inr()], dec!(12.50));
        assert_eq!(entries[1].signed_amount(), dec!(-40));
    }
}
