//! Explicit unit-of-work scopes with savepoint semantics.
//!
//! Repositories apply writes to their storage immediately and register a compensating undo
//! action with the scope they were handed. A scope then decides what happens to those undo
//! actions:
//!
//! - `commit` on a nested scope moves them into the parent, so the parent can still undo
//!   them; `commit` on a top-level scope discards them and the writes become permanent.
//! - `rollback` replays them in reverse order.
//! - Dropping a scope that was neither committed nor rolled back rolls it back.
//!
//! A nested scope mutably borrows its parent, so the parent cannot be written through while
//! a child is open:
//!
//! ```
//! use pmr_core::transaction::Transaction;
//!
//! let mut tx = Transaction::begin("example");
//! {
//!     let nested = tx.begin_nested("step");
//!     nested.commit().unwrap();
//! }
//! tx.commit().unwrap();
//! ```

use crate::{PatientError, PatientResult};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Compensating action registered by a repository write.
pub type UndoAction = Box<dyn FnOnce() -> PatientResult<()> + Send>;

/// Process-unique transaction identifier, used in log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxnId(u64);

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// A top-level unit of work or a savepoint nested inside one.
pub struct Transaction<'p> {
    id: TxnId,
    label: &'static str,
    depth: usize,
    undo: Vec<UndoAction>,
    parent: Option<&'p mut Vec<UndoAction>>,
    finished: bool,
}

impl Transaction<'static> {
    /// Opens a top-level scope.
    pub fn begin(label: &'static str) -> Self {
        let id = TxnId(NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(txn = %id, label, "begin");
        Self {
            id,
            label,
            depth: 0,
            undo: Vec::new(),
            parent: None,
            finished: false,
        }
    }
}

impl<'p> Transaction<'p> {
    /// Opens a savepoint inside this scope.
    pub fn begin_nested(&mut self, label: &'static str) -> Transaction<'_> {
        let id = TxnId(NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(txn = %id, parent = %self.id, label, depth = self.depth + 1, "begin nested");
        Transaction {
            id,
            label,
            depth: self.depth + 1,
            undo: Vec::new(),
            parent: Some(&mut self.undo),
            finished: false,
        }
    }

    /// Runs `f` inside a savepoint: commits it when `f` succeeds, rolls it back when `f`
    /// fails and returns `f`'s error.
    ///
    /// If the rollback itself fails, the rollback error is returned instead.
    pub fn savepoint<T>(
        &mut self,
        label: &'static str,
        f: impl FnOnce(&mut Transaction<'_>) -> PatientResult<T>,
    ) -> PatientResult<T> {
        let mut nested = self.begin_nested(label);
        match f(&mut nested) {
            Ok(value) => {
                nested.commit()?;
                Ok(value)
            }
            Err(e) => {
                nested.rollback()?;
                Err(e)
            }
        }
    }

    /// Registers the compensating action for a write that has already been applied.
    pub fn record_undo(&mut self, action: impl FnOnce() -> PatientResult<()> + Send + 'static) {
        self.undo.push(Box::new(action));
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Zero for a top-level scope.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_nested(&self) -> bool {
        self.parent.is_some()
    }

    /// Number of writes this scope would undo on rollback.
    pub fn pending_writes(&self) -> usize {
        self.undo.len()
    }

    pub fn commit(mut self) -> PatientResult<()> {
        self.finished = true;
        let undo = std::mem::take(&mut self.undo);
        let writes = undo.len();
        match self.parent.take() {
            Some(parent) => parent.extend(undo),
            None => drop(undo),
        }
        tracing::debug!(txn = %self.id, label = self.label, writes, "commit");
        Ok(())
    }

    pub fn rollback(mut self) -> PatientResult<()> {
        self.finished = true;
        tracing::debug!(txn = %self.id, label = self.label, writes = self.undo.len(), "rollback");
        self.undo_all()
    }

    fn undo_all(&mut self) -> PatientResult<()> {
        let mut first_error: Option<PatientError> = None;
        while let Some(action) = self.undo.pop() {
            if let Err(e) = action() {
                tracing::error!(txn = %self.id, "undo action failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        tracing::warn!(
            txn = %self.id,
            label = self.label,
            writes = self.undo.len(),
            "transaction dropped without commit; rolling back"
        );
        if let Err(e) = self.undo_all() {
            tracing::error!(txn = %self.id, "implicit rollback failed: {}", e);
        }
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("depth", &self.depth)
            .field("pending_writes", &self.undo.len())
            .finish()
    }
}
