// ============================================================================
// Transaction Scope Module
// ============================================================================
//
// The isolation core: a bounded region of session work with a guaranteed
// exit policy. Rollback-by-default undoes everything performed inside the
// scope, savepoint nesting composes, and caller errors propagate unchanged
// after cleanup.
//
// ============================================================================

pub mod config;
pub mod guard;
pub mod state;

pub use config::ScopeConfig;
pub use guard::{with_scope, TransactionScope};
pub use state::ScopeState;
