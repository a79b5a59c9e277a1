//! Transactions for arbor.
//!
//! Branch heads and the repository and branch lists are the only mutable
//! state of a repository. Every access to the store, objects included, goes
//! through a transaction scope; the scopes are serialized by
//! [`TransactionLocks`].
//!
//! # Components
//!
//! - [`TransactionLocks`] -- many readers or one writer, reentrant through
//!   the [`Transaction`] token
//! - [`TransactionalStore`] -- buffered writes committed as one batch
//! - [`ScopedKeyValueStore`] -- a key/value view opening one scope per call,
//!   for holders such as object stores
//! - change listeners -- called after commit with the re-read value, only
//!   when it changed

pub mod error;
pub mod locks;
pub mod notify;
pub mod scoped;
pub mod store;

pub use error::{TxError, TxResult};
pub use locks::{LockSnapshot, Transaction, TransactionLocks, TxMode};
pub use notify::{Listener, ListenerId};
pub use scoped::ScopedKeyValueStore;
pub use store::{StoreTx, TransactionalStore};
