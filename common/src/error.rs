//! Error types for Ratebook operations.

use crate::Currency;
use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for Ratebook operations.
///
/// Every core operation returns either its result or exactly one of these.
/// No operation leaves shared state partially mutated when it errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RatebookError {
    /// Unknown pair, wallet or transaction.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Non-positive amount or rate, unsupported currency, malformed input.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Withdrawal exceeds the current balance.
    #[error("Insufficient balance: required {required} {currency}, available {available} {currency}")]
    InsufficientBalance {
        currency: Currency,
        required: Decimal,
        available: Decimal,
    },

    /// Illegal transaction-status transition.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Persistence error.
    #[error("Storage failure: {0}")]
    StorageFailure(String),
}

impl RatebookError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RatebookError::StorageFailure(_))
    }

    /// Get error code for the transport collaborator.
    pub fn error_code(&self) -> &'static str {
        match self {
            RatebookError::NotFound(_) => "NOT_FOUND",
            RatebookError::InvalidArgument(_) => "INVALID_ARGUMENT",
            RatebookError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            RatebookError::InvalidState(_) => "INVALID_STATE",
            RatebookError::StorageFailure(_) => "STORAGE_FAILURE",
        }
    }
}

/// Result type alias for Ratebook operations.
pub type Result<T> = std::result::Result<T, RatebookError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_codes() {
        let err = RatebookError::InsufficientBalance {
            currency: Currency::bdt(),
            required: dec!(150),
            available: dec!(100),
        };
        assert_eq!(err.error_code(), "INSUFFICIENT_BALANCE");
        assert_eq!(
            err.to_string(),
            "Insufficient balance: required 150 BDT, available 100 BDT"
        );
        assert!(!err.is_retryable());
        assert!(RatebookError::StorageFailure("down".into()).is_retryable());
    }
}
