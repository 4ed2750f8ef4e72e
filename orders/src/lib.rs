//! Ratebook Exchange Orders
//!
//! Records exchange orders as immutable rate/amount snapshots and drives
//! their `pending → completed | rejected` lifecycle.

pub mod recorder;
pub mod store;
pub mod transaction;

pub use recorder::TransactionRecorder;
pub use store::{MemoryTransactionStore, SharedTransactionStore, TransactionStore};
pub use transaction::{NewTransaction, Transaction, TransactionStatus, Transition};
