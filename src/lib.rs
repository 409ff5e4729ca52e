// ============================================================================
// txscope Library
// ============================================================================
//
// Scoped transaction isolation for async database sessions. A
// TransactionScope wraps arbitrary session work in a boundary that is
// rolled back on exit by default (savepoint-nested boundaries compose),
// so tests and repeatable jobs leave the database exactly as they found
// it. The reference in-memory engine implements the full session contract
// for use in test suites.
//
// ============================================================================

pub mod core;
pub mod engine;
pub mod result;
pub mod scope;
pub mod session;

// Re-export main types for convenience
pub use self::core::{Column, DataType, Result, Row, TxError, Value};
pub use result::QueryResult;

pub use scope::{with_scope, ScopeConfig, ScopeState, TransactionScope};
pub use session::{session_stream, AsyncSession, SessionFactory, TxMark};

pub use engine::{engine_stream, Engine, EngineConfig, MemoryEngine, MemorySession};
