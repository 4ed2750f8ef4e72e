//! Wallet balances.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ratebook_common::{Currency, CurrencySet, UserId, WalletId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A user's wallet. One per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    /// Balance per supported currency, never negative, 2 fractional digits.
    pub balances: BTreeMap<Currency, Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Create a wallet with a zero balance in every supported currency.
    pub fn new(id: WalletId, user_id: UserId, currencies: &CurrencySet) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            balances: currencies
                .iter()
                .map(|c| (c.clone(), Decimal::ZERO))
                .collect(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Get the balance in a currency. Currencies never touched read as zero.
    pub fn balance(&self, currency: &Currency) -> Decimal {
        self.balances
            .get(currency)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

/// Comparison of stored balances against a replay of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAudit {
    pub wallet_id: WalletId,
    pub user_id: UserId,
    /// Balances as stored on the wallet.
    pub stored: BTreeMap<Currency, Decimal>,
    /// Balances obtained by replaying every ledger entry from zero.
    pub replayed: BTreeMap<Currency, Decimal>,
    /// Number of ledger entries replayed.
    pub entry_count: usize,
}

impl WalletAudit {
    /// Currencies whose stored balance disagrees with the replay.
    pub fn mismatches(&self) -> Vec<Currency> {
        self.stored
            .keys()
            .chain(self.replayed.keys())
            .filter(|c| {
                let stored = self.stored.get(*c).copied().unwrap_or(Decimal::ZERO);
                let replayed = self.replayed.get(*c).copied().unwrap_or(Decimal::ZERO);
                stored != replayed
            })
            .cloned()
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Check that every balance is reconstructible from the ledger.
    pub fn is_consistent(&self) -> bool {
        self.mismatches().is_empty()
    }
}
