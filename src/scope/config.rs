use serde::{Deserialize, Serialize};

/// Scope configuration
///
/// `rollback` defaults to true: a scope discards its work on exit unless
/// persistence is requested explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeConfig {
    /// Open a savepoint inside an already-open transaction instead of a
    /// top-level boundary. Requires an active outer transaction.
    pub nested: bool,

    /// Discard all changes made during the scope on exit, including commits
    /// the caller issued inside it.
    pub rollback: bool,
}

impl ScopeConfig {
    pub fn new() -> Self {
        Self {
            nested: false,
            rollback: true,
        }
    }

    /// Set the nested flag
    pub fn nested(mut self, nested: bool) -> Self {
        self.nested = nested;
        self
    }

    /// Set the rollback-on-exit policy
    pub fn rollback(mut self, rollback: bool) -> Self {
        self.rollback = rollback;
        self
    }
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self::new()
    }
}
