use std::future::Future;

use tracing::{debug, warn};

use super::{ScopeConfig, ScopeState};
use crate::core::{Result, TxError};
use crate::session::{AsyncSession, TxMark};

/// A scoped transaction boundary over an async session.
///
/// `enter` opens the boundary (top-level transaction or savepoint), the
/// caller performs arbitrary session work, and `exit` applies the configured
/// exit policy: roll everything back (default) or keep what the caller
/// committed. The session itself is only borrowed; the scope never closes it.
///
/// Dropping an active scope applies the exit policy on a background task as
/// a last resort, so cancellation of the surrounding flow still releases the
/// boundary. Prefer calling [`exit`](Self::exit) (or using
/// [`with_scope`]) so policy failures are observable.
///
/// # Examples
///
/// ```ignore
/// let scope = TransactionScope::enter(session.clone(), ScopeConfig::default()).await?;
/// session.insert("users", vec![Value::Integer(1), Value::Text("Alice".into())]).await?;
/// session.commit().await?;
/// scope.exit().await?; // everything above is rolled back
/// ```
pub struct TransactionScope<S: AsyncSession> {
    session: S,
    mark: TxMark,
    config: ScopeConfig,
    state: ScopeState,
}

impl<S: AsyncSession> TransactionScope<S> {
    /// Open a scope boundary on the session.
    ///
    /// With `nested == true` an outer transaction must already be open on
    /// the session; otherwise this fails fast with
    /// `TxError::TransactionState` rather than silently promoting to a
    /// top-level transaction.
    pub async fn enter(session: S, config: ScopeConfig) -> Result<Self> {
        let mark = if config.nested {
            if !session.in_transaction().await {
                return Err(TxError::TransactionState(
                    "nested scope requires an open outer transaction".into(),
                ));
            }
            session.mark_savepoint().await?
        } else {
            session.mark_transaction().await?
        };

        debug!(
            mark = mark.as_u64(),
            nested = config.nested,
            rollback = config.rollback,
            "transaction scope opened"
        );

        Ok(Self {
            session,
            mark,
            config,
            state: ScopeState::Active,
        })
    }

    pub fn state(&self) -> ScopeState {
        self.state
    }

    pub fn config(&self) -> ScopeConfig {
        self.config
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Apply the exit policy and finish the scope.
    ///
    /// Rollback policy discards every change made since `enter`, commits
    /// included; keep policy releases the boundary so caller commits
    /// persist. Errors from the underlying session propagate unretried.
    pub async fn exit(mut self) -> Result<()> {
        self.apply_exit_policy().await
    }

    async fn apply_exit_policy(&mut self) -> Result<()> {
        if !self.state.is_active() {
            return Err(TxError::TransactionState(format!(
                "scope is already {}",
                self.state
            )));
        }

        // Move to the terminal state before awaiting so a failed policy is
        // not retried by Drop.
        if self.config.rollback {
            self.state = ScopeState::RolledBack;
            self.session.rollback_to_mark(self.mark).await?;
            debug!(mark = self.mark.as_u64(), "transaction scope rolled back");
        } else {
            self.state = ScopeState::Committed;
            self.session.release_mark(self.mark).await?;
            debug!(mark = self.mark.as_u64(), "transaction scope released");
        }

        Ok(())
    }
}

impl<S: AsyncSession> Drop for TransactionScope<S> {
    fn drop(&mut self) {
        if !self.state.is_active() {
            return;
        }

        warn!(
            mark = self.mark.as_u64(),
            "transaction scope dropped while active; applying exit policy in background"
        );

        let session = self.session.clone();
        let mark = self.mark;
        let rollback = self.config.rollback;

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let result = if rollback {
                    session.rollback_to_mark(mark).await
                } else {
                    session.release_mark(mark).await
                };
                if let Err(err) = result {
                    warn!(%err, mark = mark.as_u64(), "exit policy failed for dropped scope");
                }
            });
        }
    }
}

/// Run `work` inside a transaction scope with guaranteed exit-policy
/// application.
///
/// The closure receives its own clone of the session handle. On success the
/// scope exits normally; on error the exit policy is applied first and the
/// original error propagates unchanged (a secondary policy failure is
/// logged, never substituted).
pub async fn with_scope<S, F, Fut, T>(session: &S, config: ScopeConfig, work: F) -> Result<T>
where
    S: AsyncSession,
    F: FnOnce(S) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let scope = TransactionScope::enter(session.clone(), config).await?;

    match work(session.clone()).await {
        Ok(value) => {
            scope.exit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(cleanup) = scope.exit().await {
                warn!(%cleanup, "exit policy failed after scope body error");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType, Value};
    use crate::engine::MemoryEngine;

    async fn engine_with_users() -> MemoryEngine {
        let engine = MemoryEngine::new();
        engine
            .create_table(
                "users",
                vec![
                    Column::new("id", DataType::Integer).not_null(),
                    Column::new("name", DataType::Text),
                ],
            )
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_enter_opens_active_scope() {
        let engine = engine_with_users().await;
        let session = engine.session().await.unwrap();

        let scope = TransactionScope::enter(session.clone(), ScopeConfig::default())
            .await
            .unwrap();
        assert_eq!(scope.state(), ScopeState::Active);
        assert!(session.in_transaction().await);

        scope.exit().await.unwrap();
    }

    #[tokio::test]
    async fn test_nested_without_transaction_fails_fast() {
        let engine = engine_with_users().await;
        let session = engine.session().await.unwrap();

        let result =
            TransactionScope::enter(session, ScopeConfig::new().nested(true)).await;
        assert!(matches!(result, Err(TxError::TransactionState(_))));
    }

    #[tokio::test]
    async fn test_with_scope_preserves_caller_error() {
        let engine = engine_with_users().await;
        let session = engine.session().await.unwrap();

        let result = with_scope(&session, ScopeConfig::default(), |s| async move {
            s.insert("users", vec![Value::Integer(1), Value::Null]).await?;
            Err::<(), _>(TxError::Execution("boom".into()))
        })
        .await;

        match result {
            Err(TxError::Execution(msg)) => assert_eq!(msg, "boom"),
            other => panic!("expected the caller error back, got {:?}", other),
        }

        // The insert was rolled back before the error surfaced.
        let found = session.get("users", &Value::Integer(1)).await.unwrap();
        assert!(found.is_none());
    }
}
