//! Reader/writer transaction locks with explicit reentrancy.
//!
//! Reentrancy is carried by the [`Transaction`] token handed to every scope
//! rather than by thread-local state, so nested scopes work the same way
//! whether they run on one thread or are driven by a task executor. A nested
//! scope never touches the lock itself; only the outermost scope acquires
//! and releases it.
//!
//! Opening an outermost scope on a thread that already holds the lock would
//! wait for itself. The lock remembers which threads hold it and rejects
//! such a scope with [`TxError::IllegalTransactionState`] instead.

use std::fmt;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::error::{TxError, TxResult};

/// What a scope is allowed to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxMode {
    Read,
    Write,
}

/// Observable lock state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockSnapshot {
    Idle,
    /// Number of outermost read scopes currently holding the lock.
    Reading(usize),
    Writing,
}

#[derive(Default, Debug)]
struct LockState {
    /// One entry per outermost read scope.
    readers: Vec<ThreadId>,
    writer: Option<ThreadId>,
}

/// Many readers or one writer.
///
/// ```text
/// Idle --run_read--> Reading(n) --run_read--> Reading(n+1)
/// Idle --run_write-> Writing   (waits for all readers and writers to leave)
/// Writing --tx.run_read--> nested read, write capability suspended
/// Reading --tx.run_write-> IllegalTransactionState
/// Writing --run_read/run_write on the writing thread--> IllegalTransactionState
/// Reading --run_write on a reading thread--> IllegalTransactionState
/// ```
#[derive(Default)]
pub struct TransactionLocks {
    state: Mutex<LockState>,
    released: Condvar,
}

impl TransactionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` holding a shared lock.
    pub fn run_read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<TxError>,
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
    {
        let _guard = self.acquire_read()?;
        f(&Transaction {
            locks: self,
            mode: TxMode::Read,
            depth: 0,
        })
    }

    /// Run `f` holding the exclusive lock.
    pub fn run_write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<TxError>,
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
    {
        let _guard = self.acquire_write()?;
        f(&Transaction {
            locks: self,
            mode: TxMode::Write,
            depth: 0,
        })
    }

    pub fn snapshot(&self) -> LockSnapshot {
        let state = self.state.lock();
        if state.writer.is_some() {
            LockSnapshot::Writing
        } else if !state.readers.is_empty() {
            LockSnapshot::Reading(state.readers.len())
        } else {
            LockSnapshot::Idle
        }
    }

    fn acquire_read(&self) -> TxResult<ReadGuard<'_>> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.writer == Some(me) {
            return Err(TxError::IllegalTransactionState(
                "read scope opened outside the enclosing write transaction".into(),
            ));
        }
        while state.writer.is_some() {
            self.released.wait(&mut state);
        }
        state.readers.push(me);
        trace!(readers = state.readers.len(), "read lock acquired");
        Ok(ReadGuard { locks: self, thread: me })
    }

    fn acquire_write(&self) -> TxResult<WriteGuard<'_>> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.writer == Some(me) || state.readers.contains(&me) {
            return Err(TxError::IllegalTransactionState(
                "write scope opened outside the enclosing transaction".into(),
            ));
        }
        while state.writer.is_some() || !state.readers.is_empty() {
            self.released.wait(&mut state);
        }
        state.writer = Some(me);
        trace!("write lock acquired");
        Ok(WriteGuard { locks: self })
    }
}

impl fmt::Debug for TransactionLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionLocks")
            .field("state", &self.snapshot())
            .finish()
    }
}

struct ReadGuard<'l> {
    locks: &'l TransactionLocks,
    thread: ThreadId,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.locks.state.lock();
        if let Some(i) = state.readers.iter().position(|t| *t == self.thread) {
            state.readers.swap_remove(i);
        }
        if state.readers.is_empty() {
            self.locks.released.notify_all();
        }
    }
}

struct WriteGuard<'l> {
    locks: &'l TransactionLocks,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.locks.state.lock().writer = None;
        self.locks.released.notify_all();
    }
}

/// Proof that the caller is inside a transaction scope.
///
/// Nested scopes are opened through the token, which keeps the lock held by
/// the outermost scope and only changes what the nested scope may do.
pub struct Transaction<'l> {
    locks: &'l TransactionLocks,
    mode: TxMode,
    depth: usize,
}

impl<'l> Transaction<'l> {
    pub fn mode(&self) -> TxMode {
        self.mode
    }

    pub fn can_write(&self) -> bool {
        self.mode == TxMode::Write
    }

    /// Nesting level; the outermost scope is 0.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn require_write(&self) -> TxResult<()> {
        if self.can_write() {
            Ok(())
        } else {
            Err(TxError::IllegalTransactionState(
                "write attempted inside a read transaction".into(),
            ))
        }
    }

    /// Nested read scope. Inside a write, the write capability is suspended
    /// until the nested scope returns.
    pub fn run_read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction<'l>) -> Result<T, E>,
    {
        f(&self.nested(TxMode::Read))
    }

    /// Nested write scope. Fails immediately unless this scope can write.
    pub fn run_write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<TxError>,
        F: FnOnce(&Transaction<'l>) -> Result<T, E>,
    {
        self.require_write()?;
        f(&self.nested(TxMode::Write))
    }

    fn nested(&self, mode: TxMode) -> Transaction<'l> {
        Transaction {
            locks: self.locks,
            mode,
            depth: self.depth + 1,
        }
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("mode", &self.mode)
            .field("depth", &self.depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    // ---- state machine ----

    #[test]
    fn snapshot_follows_scopes() {
        let locks = TransactionLocks::new();
        assert_eq!(locks.snapshot(), LockSnapshot::Idle);
        locks
            .run_read(|_| {
                assert_eq!(locks.snapshot(), LockSnapshot::Reading(1));
                Ok::<_, TxError>(())
            })
            .unwrap();
        locks
            .run_write(|_| {
                assert_eq!(locks.snapshot(), LockSnapshot::Writing);
                Ok::<_, TxError>(())
            })
            .unwrap();
        assert_eq!(locks.snapshot(), LockSnapshot::Idle);
    }

    #[test]
    fn read_inside_write_suspends_write_capability() {
        let locks = TransactionLocks::new();
        locks
            .run_write(|tx| {
                assert!(tx.can_write());
                tx.run_read(|inner| {
                    assert!(!inner.can_write());
                    assert_eq!(inner.depth(), 1);
                    assert!(inner.run_write(|_| Ok::<_, TxError>(())).is_err());
                    Ok::<_, TxError>(())
                })?;
                assert!(tx.can_write());
                tx.run_write(|inner| {
                    assert!(inner.can_write());
                    Ok::<_, TxError>(())
                })
            })
            .unwrap();
    }

    #[test]
    fn write_inside_read_is_illegal() {
        let locks = TransactionLocks::new();
        let result = locks.run_read(|tx| tx.run_write(|_| Ok::<_, TxError>(())));
        assert!(matches!(result, Err(TxError::IllegalTransactionState(_))));
        // Reads nest freely.
        let depth = locks
            .run_read(|tx| tx.run_read(|inner| inner.run_read(|d| Ok::<_, TxError>(d.depth()))))
            .unwrap();
        assert_eq!(depth, 2);
    }

    #[test]
    fn scopes_opened_without_the_token_are_rejected() {
        let locks = TransactionLocks::new();
        let result = locks.run_write(|_| locks.run_read(|_| Ok::<_, TxError>(())));
        assert!(matches!(result, Err(TxError::IllegalTransactionState(_))));
        let result = locks.run_write(|_| locks.run_write(|_| Ok::<_, TxError>(())));
        assert!(matches!(result, Err(TxError::IllegalTransactionState(_))));
        let result = locks.run_read(|_| locks.run_write(|_| Ok::<_, TxError>(())));
        assert!(matches!(result, Err(TxError::IllegalTransactionState(_))));
        // A second outermost read on the same thread cannot wait for itself.
        let depth = locks.run_read(|_| locks.run_read(|tx| Ok::<_, TxError>(tx.depth())));
        assert_eq!(depth.unwrap(), 0);
        assert_eq!(locks.snapshot(), LockSnapshot::Idle);
    }

    #[test]
    fn errors_release_the_lock() {
        let locks = TransactionLocks::new();
        let result: Result<(), TxError> = locks.run_write(|_| {
            Err(TxError::IllegalTransactionState("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(locks.snapshot(), LockSnapshot::Idle);
    }

    // ---- concurrency ----

    #[test]
    fn writes_are_exclusive() {
        let locks = Arc::new(TransactionLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let (locks, active, peak) = (locks.clone(), active.clone(), peak.clone());
                thread::spawn(move || {
                    for _ in 0..50 {
                        if i % 2 == 0 {
                            locks
                                .run_write(|_| {
                                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                                    peak.fetch_max(now, Ordering::SeqCst);
                                    thread::yield_now();
                                    active.fetch_sub(1, Ordering::SeqCst);
                                    Ok::<_, TxError>(())
                                })
                                .unwrap();
                        } else {
                            locks
                                .run_read(|_| {
                                    assert_eq!(active.load(Ordering::SeqCst), 0);
                                    Ok::<_, TxError>(())
                                })
                                .unwrap();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(locks.snapshot(), LockSnapshot::Idle);
    }
}
