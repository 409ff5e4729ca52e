// ============================================================================
// Reference In-Memory Engine
// ============================================================================
//
// A compact collaborator implementing the full session contract so scope
// semantics are observable without a real database. Transactions are a
// stack of frames over copy-on-write table snapshots:
//
// - the bottom frame is the session transaction (explicit begin or
//   autobegin on first data operation);
// - scope boundaries push scope-owned frames on top;
// - a caller commit with a boundary on top is absorbed at the boundary
//   (recorded as its committed state) instead of becoming durable, which
//   is what makes a later boundary rollback undo it.
//
// ============================================================================

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, trace};

use super::{Engine, EngineConfig};
use crate::core::{Column, Result, Row, TxError, Value};
use crate::result::QueryResult;
use crate::session::{AsyncSession, TxMark};
use async_trait::async_trait;

type Tables = im::HashMap<String, Table>;

#[derive(Debug, Clone)]
struct Table {
    columns: Vec<Column>,
    rows: im::HashMap<Value, Row>,
}

/// Shared in-memory database. Cheap to clone; all clones see the same
/// durable state.
#[derive(Clone)]
pub struct MemoryEngine {
    config: EngineConfig,
    tables: Arc<RwLock<Tables>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            tables: Arc::new(RwLock::new(Tables::new())),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a table keyed by its first column. DDL is durable
    /// immediately; open transactions keep their snapshot.
    pub async fn create_table(&self, name: &str, columns: Vec<Column>) -> Result<()> {
        if columns.is_empty() {
            return Err(TxError::Execution(format!(
                "table '{}' requires at least one column",
                name
            )));
        }

        let mut tables = self.tables.write().await;
        if tables.contains_key(name) {
            return Err(TxError::TableExists(name.to_string()));
        }

        tables.insert(
            name.to_string(),
            Table {
                columns,
                rows: im::HashMap::new(),
            },
        );
        debug!(table = name, "table created");
        Ok(())
    }

    /// Open a fresh session bound to this engine.
    pub async fn session(&self) -> Result<MemorySession> {
        Ok(MemorySession::new(self.clone()))
    }

    async fn snapshot(&self) -> Tables {
        self.tables.read().await.clone()
    }

    async fn publish(&self, tables: Tables) {
        trace!("publishing committed session state");
        *self.tables.write().await = tables;
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    type Session = MemorySession;

    async fn session(&self) -> Result<MemorySession> {
        MemoryEngine::session(self).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FrameOwner {
    /// Opened by the caller (explicit begin or autobegin)
    Session,
    /// Opened by a transaction scope; commits are subordinate to it
    Scope(TxMark),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Transaction,
    Savepoint,
}

#[derive(Debug, Clone)]
struct Frame {
    owner: FrameOwner,
    kind: FrameKind,
    /// Working state when the frame was opened; rollback target
    entry: Tables,
    /// Last state a caller commit recorded at this boundary
    committed: Tables,
}

impl Frame {
    fn new(owner: FrameOwner, kind: FrameKind, entry: Tables) -> Self {
        Self {
            owner,
            kind,
            committed: entry.clone(),
            entry,
        }
    }
}

struct SessionInner {
    working: Tables,
    frames: Vec<Frame>,
}

/// Session handle over a [`MemoryEngine`].
///
/// Clonable view over shared session state; intended for one logical flow
/// of control at a time.
#[derive(Clone)]
pub struct MemorySession {
    engine: MemoryEngine,
    inner: Arc<Mutex<SessionInner>>,
}

impl MemorySession {
    fn new(engine: MemoryEngine) -> Self {
        Self {
            engine,
            inner: Arc::new(Mutex::new(SessionInner {
                working: Tables::new(),
                frames: Vec::new(),
            })),
        }
    }

    /// Begin the session transaction if none is open, pulling a fresh
    /// engine snapshot. Honors the engine's autobegin setting when called
    /// implicitly.
    async fn ensure_begun(&self, inner: &mut SessionInner, implicit: bool) -> Result<()> {
        if !inner.frames.is_empty() {
            return Ok(());
        }
        if implicit && !self.engine.config.autobegin {
            return Err(TxError::TransactionState(
                "no active transaction (autobegin disabled)".into(),
            ));
        }

        let snapshot = self.engine.snapshot().await;
        inner.working = snapshot.clone();
        inner.frames.push(Frame::new(
            FrameOwner::Session,
            FrameKind::Transaction,
            snapshot,
        ));
        trace!("session transaction begun");
        Ok(())
    }

    fn find_mark(frames: &[Frame], mark: TxMark) -> Result<usize> {
        frames
            .iter()
            .position(|f| f.owner == FrameOwner::Scope(mark))
            .ok_or_else(|| {
                TxError::TransactionState(format!(
                    "unknown or already released transaction mark {}",
                    mark
                ))
            })
    }

    fn table_mut<'a>(tables: &'a mut Tables, name: &str) -> Result<&'a mut Table> {
        tables
            .get_mut(name)
            .ok_or_else(|| TxError::TableNotFound(name.to_string()))
    }

    // ------------------------------------------------------------------
    // Data operations
    // ------------------------------------------------------------------

    /// Insert a row; the first column is the key.
    pub async fn insert(&self, table: &str, row: Row) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_begun(&mut inner, true).await?;

        let target = Self::table_mut(&mut inner.working, table)?;
        if row.len() != target.columns.len() {
            return Err(TxError::TypeMismatch(format!(
                "table '{}' expects {} values, got {}",
                table,
                target.columns.len(),
                row.len()
            )));
        }
        for (column, value) in target.columns.iter().zip(row.iter()) {
            column.validate(value)?;
        }

        let Some(key) = row.first().cloned() else {
            return Err(TxError::Execution("cannot insert an empty row".into()));
        };
        if key.is_null() {
            return Err(TxError::ConstraintViolation(format!(
                "key column of table '{}' cannot be NULL",
                table
            )));
        }
        if target.rows.contains_key(&key) {
            return Err(TxError::ConstraintViolation(format!(
                "duplicate key {} in table '{}'",
                key, table
            )));
        }

        target.rows.insert(key, row);
        Ok(())
    }

    /// Replace the row stored at `key`. The key column cannot change.
    pub async fn update(&self, table: &str, key: &Value, row: Row) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_begun(&mut inner, true).await?;

        let target = Self::table_mut(&mut inner.working, table)?;
        if row.len() != target.columns.len() {
            return Err(TxError::TypeMismatch(format!(
                "table '{}' expects {} values, got {}",
                table,
                target.columns.len(),
                row.len()
            )));
        }
        for (column, value) in target.columns.iter().zip(row.iter()) {
            column.validate(value)?;
        }
        if row.first() != Some(key) {
            return Err(TxError::ConstraintViolation(format!(
                "cannot change the key of a row in table '{}'",
                table
            )));
        }
        if !target.rows.contains_key(key) {
            return Err(TxError::Execution(format!(
                "no row with key {} in table '{}'",
                key, table
            )));
        }

        target.rows.insert(key.clone(), row);
        Ok(())
    }

    /// Delete the row stored at `key`.
    pub async fn delete(&self, table: &str, key: &Value) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_begun(&mut inner, true).await?;

        let target = Self::table_mut(&mut inner.working, table)?;
        if target.rows.remove(key).is_none() {
            return Err(TxError::Execution(format!(
                "no row with key {} in table '{}'",
                key, table
            )));
        }
        Ok(())
    }

    /// Get a row by its key.
    pub async fn get(&self, table: &str, key: &Value) -> Result<Option<Row>> {
        let mut inner = self.inner.lock().await;
        self.ensure_begun(&mut inner, true).await?;

        let target = inner
            .working
            .get(table)
            .ok_or_else(|| TxError::TableNotFound(table.to_string()))?;
        Ok(target.rows.get(key).cloned())
    }

    /// Scan a table, rows ordered by key.
    pub async fn select(&self, table: &str) -> Result<QueryResult> {
        let mut inner = self.inner.lock().await;
        self.ensure_begun(&mut inner, true).await?;

        let target = inner
            .working
            .get(table)
            .ok_or_else(|| TxError::TableNotFound(table.to_string()))?;

        let columns = target.columns.iter().map(|c| c.name.clone()).collect();
        let mut keyed: Vec<(&Value, &Row)> = target.rows.iter().collect();
        keyed.sort_by(|(a, _), (b, _)| {
            a.compare(b).unwrap_or(std::cmp::Ordering::Equal)
        });
        let rows = keyed.into_iter().map(|(_, row)| row.clone()).collect();

        Ok(QueryResult::new(columns, rows))
    }
}

#[async_trait]
impl AsyncSession for MemorySession {
    async fn begin(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_begun(&mut inner, false).await
    }

    async fn commit(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let top_is_boundary = match inner.frames.last() {
            None => {
                return Err(TxError::TransactionState("no active transaction".into()));
            }
            Some(frame) => matches!(frame.owner, FrameOwner::Scope(_)),
        };

        if top_is_boundary {
            // Subordinate commit: record at the boundary, stay open.
            let working = inner.working.clone();
            if let Some(frame) = inner.frames.last_mut() {
                frame.committed = working;
            }
            trace!("commit absorbed at scope boundary");
            Ok(())
        } else {
            inner.frames.pop();
            let working = inner.working.clone();
            debug!("session transaction committed");
            self.engine.publish(working).await;
            Ok(())
        }
    }

    async fn rollback(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let top_is_boundary = match inner.frames.last() {
            None => {
                return Err(TxError::TransactionState("no active transaction".into()));
            }
            Some(frame) => matches!(frame.owner, FrameOwner::Scope(_)),
        };

        if top_is_boundary {
            // Roll back to the last commit recorded at the boundary; the
            // boundary itself stays open for its scope to finish.
            if let Some(frame) = inner.frames.last() {
                inner.working = frame.committed.clone();
            }
            Ok(())
        } else if let Some(frame) = inner.frames.pop() {
            inner.working = frame.entry;
            debug!("session transaction rolled back");
            Ok(())
        } else {
            Err(TxError::TransactionState("no active transaction".into()))
        }
    }

    async fn in_transaction(&self) -> bool {
        !self.inner.lock().await.frames.is_empty()
    }

    async fn mark_transaction(&self) -> Result<TxMark> {
        let mut inner = self.inner.lock().await;
        let mark = TxMark::next();

        let entry = if inner.frames.is_empty() {
            let snapshot = self.engine.snapshot().await;
            inner.working = snapshot.clone();
            snapshot
        } else {
            // A transaction is already implicitly active; the boundary
            // anchors to the current working state.
            inner.working.clone()
        };

        inner.frames.push(Frame::new(
            FrameOwner::Scope(mark),
            FrameKind::Transaction,
            entry,
        ));
        trace!(mark = mark.as_u64(), "scope transaction boundary opened");
        Ok(mark)
    }

    async fn mark_savepoint(&self) -> Result<TxMark> {
        let mut inner = self.inner.lock().await;
        if inner.frames.is_empty() {
            return Err(TxError::TransactionState(
                "savepoint requires an active transaction".into(),
            ));
        }

        let mark = TxMark::next();
        let entry = inner.working.clone();
        inner.frames.push(Frame::new(
            FrameOwner::Scope(mark),
            FrameKind::Savepoint,
            entry,
        ));
        trace!(mark = mark.as_u64(), "savepoint boundary opened");
        Ok(mark)
    }

    async fn rollback_to_mark(&self, mark: TxMark) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let pos = Self::find_mark(&inner.frames, mark)?;

        let Some(frame) = inner.frames.drain(pos..).next() else {
            return Err(TxError::TransactionState(format!(
                "transaction mark {} vanished",
                mark
            )));
        };
        inner.working = frame.entry;
        debug!(
            mark = mark.as_u64(),
            kind = ?frame.kind,
            "rolled back to boundary"
        );
        Ok(())
    }

    async fn release_mark(&self, mark: TxMark) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let pos = Self::find_mark(&inner.frames, mark)?;

        let Some(frame) = inner.frames.drain(pos..).next() else {
            return Err(TxError::TransactionState(format!(
                "transaction mark {} vanished",
                mark
            )));
        };
        // Uncommitted tail work is discarded; only state the caller
        // committed at this boundary survives.
        inner.working = frame.committed;

        if inner.frames.is_empty() {
            let working = inner.working.clone();
            debug!(mark = mark.as_u64(), "boundary released durably");
            self.engine.publish(working).await;
        } else {
            debug!(mark = mark.as_u64(), "boundary released into parent");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;

    async fn users_engine() -> MemoryEngine {
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

    fn user(id: i64, name: &str) -> Row {
        vec![Value::Integer(id), Value::Text(name.to_string())]
    }

    #[tokio::test]
    async fn test_create_table_twice_fails() {
        let engine = users_engine().await;
        let result = engine
            .create_table("users", vec![Column::new("id", DataType::Integer)])
            .await;
        assert!(matches!(result, Err(TxError::TableExists(_))));
    }

    #[tokio::test]
    async fn test_autobegin_on_first_operation() {
        let engine = users_engine().await;
        let session = engine.session().await.unwrap();

        assert!(!session.in_transaction().await);
        session.insert("users", user(1, "Alice")).await.unwrap();
        assert!(session.in_transaction().await);
    }

    #[tokio::test]
    async fn test_autobegin_disabled_errors() {
        let engine = MemoryEngine::with_config(EngineConfig::new("db").autobegin(false));
        engine
            .create_table("users", vec![Column::new("id", DataType::Integer)])
            .await
            .unwrap();
        let session = engine.session().await.unwrap();

        let result = session.insert("users", vec![Value::Integer(1)]).await;
        assert!(matches!(result, Err(TxError::TransactionState(_))));

        // An explicit begin makes the same operation legal.
        session.begin().await.unwrap();
        session.insert("users", vec![Value::Integer(1)]).await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_publishes_to_engine() {
        let engine = users_engine().await;
        let session = engine.session().await.unwrap();

        session.insert("users", user(1, "Alice")).await.unwrap();
        session.commit().await.unwrap();

        // A second session sees the committed row.
        let other = engine.session().await.unwrap();
        let found = other.get("users", &Value::Integer(1)).await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_rollback_restores_entry_state() {
        let engine = users_engine().await;
        let session = engine.session().await.unwrap();

        session.insert("users", user(1, "Alice")).await.unwrap();
        session.rollback().await.unwrap();
        assert!(!session.in_transaction().await);

        let found = session.get("users", &Value::Integer(1)).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_commit_without_transaction_errors() {
        let engine = users_engine().await;
        let session = engine.session().await.unwrap();
        assert!(matches!(
            session.commit().await,
            Err(TxError::TransactionState(_))
        ));
        assert!(matches!(
            session.rollback().await,
            Err(TxError::TransactionState(_))
        ));
    }

    #[tokio::test]
    async fn test_savepoint_requires_transaction() {
        let engine = users_engine().await;
        let session = engine.session().await.unwrap();
        assert!(matches!(
            session.mark_savepoint().await,
            Err(TxError::TransactionState(_))
        ));
    }

    #[tokio::test]
    async fn test_commit_is_absorbed_at_boundary() {
        let engine = users_engine().await;
        let session = engine.session().await.unwrap();

        let mark = session.mark_transaction().await.unwrap();
        session.insert("users", user(1, "Alice")).await.unwrap();
        session.commit().await.unwrap();

        // The commit did not reach the engine.
        let other = engine.session().await.unwrap();
        assert!(other.get("users", &Value::Integer(1)).await.unwrap().is_none());

        // Rolling back to the boundary undoes the committed insert.
        session.rollback_to_mark(mark).await.unwrap();
        assert!(session.get("users", &Value::Integer(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_release_keeps_committed_discards_uncommitted() {
        let engine = users_engine().await;
        let session = engine.session().await.unwrap();

        let mark = session.mark_transaction().await.unwrap();
        session.insert("users", user(1, "Alice")).await.unwrap();
        session.commit().await.unwrap();
        session.insert("users", user(2, "Bob")).await.unwrap(); // never committed

        session.release_mark(mark).await.unwrap();

        let other = engine.session().await.unwrap();
        assert!(other.get("users", &Value::Integer(1)).await.unwrap().is_some());
        assert!(other.get("users", &Value::Integer(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_mark_is_rejected() {
        let engine = users_engine().await;
        let session = engine.session().await.unwrap();

        let mark = session.mark_transaction().await.unwrap();
        session.release_mark(mark).await.unwrap();

        assert!(matches!(
            session.rollback_to_mark(mark).await,
            Err(TxError::TransactionState(_))
        ));
    }

    #[tokio::test]
    async fn test_constraint_checks() {
        let engine = users_engine().await;
        let session = engine.session().await.unwrap();

        session.insert("users", user(1, "Alice")).await.unwrap();
        assert!(matches!(
            session.insert("users", user(1, "Clone")).await,
            Err(TxError::ConstraintViolation(_))
        ));
        assert!(matches!(
            session.insert("users", vec![Value::Integer(2)]).await,
            Err(TxError::TypeMismatch(_))
        ));
        assert!(matches!(
            session
                .insert("users", vec![Value::Text("x".into()), Value::Text("y".into())])
                .await,
            Err(TxError::TypeMismatch(_))
        ));
        assert!(matches!(
            session.insert("ghosts", user(1, "Casper")).await,
            Err(TxError::TableNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let engine = users_engine().await;
        let session = engine.session().await.unwrap();

        session.insert("users", user(1, "Alice")).await.unwrap();
        session
            .update("users", &Value::Integer(1), user(1, "Alicia"))
            .await
            .unwrap();

        let row = session.get("users", &Value::Integer(1)).await.unwrap().unwrap();
        assert_eq!(row[1], Value::Text("Alicia".into()));

        // Key changes are rejected.
        assert!(session
            .update("users", &Value::Integer(1), user(9, "Nope"))
            .await
            .is_err());

        session.delete("users", &Value::Integer(1)).await.unwrap();
        assert!(session.get("users", &Value::Integer(1)).await.unwrap().is_none());
        assert!(session.delete("users", &Value::Integer(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_select_orders_by_key() {
        let engine = users_engine().await;
        let session = engine.session().await.unwrap();

        session.insert("users", user(2, "Bob")).await.unwrap();
        session.insert("users", user(1, "Alice")).await.unwrap();

        let result = session.select("users").await.unwrap();
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.columns, vec!["id".to_string(), "name".to_string()]);
        assert_eq!(result.rows()[0][0], Value::Integer(1));
        assert_eq!(result.rows()[1][0], Value::Integer(2));
    }
}
