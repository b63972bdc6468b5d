//! Core error types
//!
//! Every failure an operation can report. Business rejections and
//! concurrency conflicts are kept apart so a caller can automate retries
//! without ever retrying a legitimately rejected operation.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::core_types::{AccountId, ProductId, TransferId};
use crate::store::StoreError;

/// Caller input that can never succeed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Source and destination account cannot be the same")]
    SameAccount,

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Stock delta must not be zero")]
    ZeroDelta,

    #[error("Initial balance must not be negative")]
    NegativeBalance,

    #[error("Initial stock must not be negative")]
    NegativeStock,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::SameAccount => "SAME_ACCOUNT",
            ValidationError::InvalidAmount => "INVALID_AMOUNT",
            ValidationError::ZeroDelta => "ZERO_DELTA",
            ValidationError::NegativeBalance => "NEGATIVE_BALANCE",
            ValidationError::NegativeStock => "NEGATIVE_STOCK",
        }
    }
}

/// Error returned by every orchestrator operation.
///
/// Raised from inside an open transaction scope, which is always rolled back
/// before the error reaches the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    // === Validation Errors ===
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    // === Lookup Errors ===
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Transfer not found: {0}")]
    TransferNotFound(TransferId),

    // === Business Rejections ===
    #[error("Account is inactive: {0}")]
    InactiveAccount(AccountId),

    #[error("Insufficient funds in account {account_id}: available {available}, requested {requested}")]
    InsufficientFunds {
        account_id: AccountId,
        available: Decimal,
        requested: Decimal,
    },

    #[error("Insufficient stock for product {product_id}: available {available}, delta {delta}")]
    InsufficientStock {
        product_id: ProductId,
        available: i64,
        delta: i64,
    },

    #[error("Balance of account {0} would leave the representable range")]
    BalanceOverflow(AccountId),

    // === Concurrency ===
    #[error("Concurrency conflict on {entity} {id}: version changed since read")]
    ConcurrencyConflict { entity: &'static str, id: i64 },

    // === System Errors ===
    #[error("Transaction failed: {0}")]
    TransactionFailure(#[from] StoreError),
}

impl CoreError {
    /// Error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(v) => v.code(),
            CoreError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            CoreError::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            CoreError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            CoreError::InactiveAccount(_) => "INACTIVE_ACCOUNT",
            CoreError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            CoreError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            CoreError::BalanceOverflow(_) => "BALANCE_OVERFLOW",
            CoreError::ConcurrencyConflict { .. } => "CONCURRENCY_CONFLICT",
            CoreError::TransactionFailure(_) => "TRANSACTION_FAILURE",
        }
    }

    /// HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            CoreError::Validation(_) => 400,
            CoreError::AccountNotFound(_)
            | CoreError::ProductNotFound(_)
            | CoreError::TransferNotFound(_) => 404,
            CoreError::ConcurrencyConflict { .. } => 409,
            CoreError::InactiveAccount(_)
            | CoreError::InsufficientFunds { .. }
            | CoreError::InsufficientStock { .. }
            | CoreError::BalanceOverflow(_) => 422,
            CoreError::TransactionFailure(StoreError::Unavailable(_)) => 503,
            CoreError::TransactionFailure(_) => 500,
        }
    }

    /// Only version conflicts are worth re-attempting with fresh reads.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::ConcurrencyConflict { .. })
    }

    /// Rejected by a business rule (as opposed to input, lookup or system)
    pub fn is_business_rejection(&self) -> bool {
        matches!(
            self,
            CoreError::InactiveAccount(_)
                | CoreError::InsufficientFunds { .. }
                | CoreError::InsufficientStock { .. }
                | CoreError::BalanceOverflow(_)
        )
    }

    pub(crate) fn conflict<R: crate::store::VersionedRecord>(id: i64) -> Self {
        CoreError::ConcurrencyConflict {
            entity: R::ENTITY,
            id,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            CoreError::from(ValidationError::SameAccount).code(),
            "SAME_ACCOUNT"
        );
        assert_eq!(CoreError::AccountNotFound(9).code(), "ACCOUNT_NOT_FOUND");
        assert_eq!(
            CoreError::ConcurrencyConflict {
                entity: "account",
                id: 1
            }
            .code(),
            "CONCURRENCY_CONFLICT"
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(CoreError::from(ValidationError::InvalidAmount).http_status(), 400);
        assert_eq!(CoreError::ProductNotFound(1).http_status(), 404);
        assert_eq!(
            CoreError::ConcurrencyConflict {
                entity: "product",
                id: 1
            }
            .http_status(),
            409
        );
        assert_eq!(CoreError::InactiveAccount(1).http_status(), 422);
        assert_eq!(
            CoreError::from(StoreError::Deadlock("40P01".into())).http_status(),
            500
        );
        assert_eq!(
            CoreError::from(StoreError::Unavailable("down".into())).http_status(),
            503
        );
    }

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(
            CoreError::ConcurrencyConflict {
                entity: "account",
                id: 1
            }
            .is_retryable()
        );
        assert!(
            !CoreError::InsufficientStock {
                product_id: 5,
                available: 7,
                delta: -20
            }
            .is_retryable()
        );
        assert!(!CoreError::from(StoreError::LockTimeout("x".into())).is_retryable());
        assert!(!CoreError::from(ValidationError::SameAccount).is_retryable());
    }

    #[test]
    fn test_business_rejection() {
        assert!(CoreError::InactiveAccount(3).is_business_rejection());
        assert!(CoreError::BalanceOverflow(3).is_business_rejection());
        assert!(!CoreError::AccountNotFound(3).is_business_rejection());
    }

    #[test]
    fn test_display() {
        let err = CoreError::InsufficientFunds {
            account_id: 1,
            available: Decimal::from(100),
            requested: Decimal::from(200),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds in account 1: available 100, requested 200"
        );
    }
}
