// ============================================================================
// Session Contract
// ============================================================================
//
// The external-collaborator interface a transaction scope operates against.
// A session is a stateful handle over one logical database connection; the
// scope never creates or closes it, it only drives transaction boundaries.
//
// ============================================================================

pub mod factory;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::core::Result;

pub use factory::{session_stream, SessionFactory};

/// Global boundary mark counter
static NEXT_MARK: AtomicU64 = AtomicU64::new(1);

/// Opaque token identifying a transaction boundary opened by a scope.
///
/// A mark is valid until it is rolled back to or released; using it after
/// that reports a `TxError::TransactionState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxMark(u64);

impl TxMark {
    /// Allocate a new unique mark. Session implementations call this when
    /// opening a boundary.
    pub fn next() -> Self {
        TxMark(NEXT_MARK.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TxMark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mark_{}", self.0)
    }
}

/// Async database session handle.
///
/// Caller-facing transaction control plus the boundary API used by
/// [`TransactionScope`](crate::scope::TransactionScope). Handles are cheaply
/// clonable views over shared state; a handle must not be driven from two
/// scopes concurrently (caller obligation).
#[async_trait]
pub trait AsyncSession: Clone + Send + Sync + 'static {
    /// Begin a session transaction. A no-op if one is already open.
    async fn begin(&self) -> Result<()>;

    /// Commit the current session transaction.
    ///
    /// Inside an open scope boundary the commit is subordinate to the
    /// boundary: it records the committed state at the boundary and is
    /// undone if the boundary later rolls back.
    async fn commit(&self) -> Result<()>;

    /// Roll back to the start of the innermost transaction or boundary.
    async fn rollback(&self) -> Result<()>;

    /// Whether any transaction (session-owned or boundary) is open.
    async fn in_transaction(&self) -> bool;

    /// Open a top-level scope boundary, beginning a transaction if none is
    /// active.
    async fn mark_transaction(&self) -> Result<TxMark>;

    /// Open a savepoint boundary inside the current transaction.
    ///
    /// Fails with `TxError::TransactionState` when no transaction is open.
    async fn mark_savepoint(&self) -> Result<TxMark>;

    /// Discard every change made since the mark, releasing it.
    async fn rollback_to_mark(&self, mark: TxMark) -> Result<()>;

    /// Release the mark, keeping the work committed inside the boundary.
    async fn release_mark(&self, mark: TxMark) -> Result<()>;
}
