//! Ratebook Wallet Ledger
//!
//! Per-user currency balances maintained through an append-only ledger.
//! Every balance change and its ledger entry are applied as one unit,
//! serialized per wallet so concurrent withdrawals never overdraw.

pub mod engine;
pub mod journal;
pub mod store;
pub mod wallet;

pub use engine::WalletLedger;
pub use journal::{reconstruct, BalanceMutation, EntryType, WalletLedgerEntry};
pub use store::{MemoryWalletStore, SharedWalletStore, WalletStore};
pub use wallet::{Wallet, WalletAudit};
