// ============================================================================
// Scope State Management
// ============================================================================
//
// Implements the State Pattern for the scope lifecycle. A scope moves
// through defined states and terminal states reject further transitions.
//
// ============================================================================

/// Scope lifecycle state
///
/// State transitions:
/// ```text
/// NotStarted ──enter──> Active ──exit (rollback policy)──> RolledBack
///                         │
///                         └──exit (keep policy)──> Committed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    /// Scope has been configured but no boundary is open yet
    NotStarted,

    /// Boundary is open; the caller's work runs in this window
    Active,

    /// Exited with the keep policy; committed work persists
    Committed,

    /// Exited with the rollback policy; all scope work discarded
    RolledBack,
}

impl ScopeState {
    /// Check if the scope currently holds an open boundary
    pub fn is_active(&self) -> bool {
        matches!(self, ScopeState::Active)
    }

    /// Check if the scope is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScopeState::Committed | ScopeState::RolledBack)
    }
}

impl std::fmt::Display for ScopeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeState::NotStarted => write!(f, "NOT_STARTED"),
            ScopeState::Active => write!(f, "ACTIVE"),
            ScopeState::Committed => write!(f, "COMMITTED"),
            ScopeState::RolledBack => write!(f, "ROLLED_BACK"),
        }
    }
}
