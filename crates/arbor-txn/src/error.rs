//! Error types for transactions.

use arbor_store::{StoreError, StoreKey};

/// Errors that can occur inside a transaction scope.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TxError {
    /// A write was attempted where only reads are allowed. This is a
    /// programming error and is never retried.
    #[error("illegal transaction state: {0}")]
    IllegalTransactionState(String),

    /// Content-addressed keys never change, so they cannot be listened to.
    #[error("cannot listen to object key {0}")]
    ObjectKeyNotListenable(StoreKey),

    /// Reading or committing to the key/value store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Convenience alias for transaction results.
pub type TxResult<T> = Result<T, TxError>;
