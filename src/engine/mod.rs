// ============================================================================
// Engine Module
// ============================================================================

pub mod memory;

use async_trait::async_trait;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};

use crate::core::{Result, TxError};
use crate::session::{AsyncSession, SessionFactory};

pub use memory::{MemoryEngine, MemorySession};

/// A handle to a database an application can open sessions against.
#[async_trait]
pub trait Engine: Clone + Send + Sync + 'static {
    type Session: AsyncSession;

    /// Open a fresh session bound to this engine.
    async fn session(&self) -> Result<Self::Session>;
}

// Every engine is a session factory for its own session type.
#[async_trait]
impl<E: Engine> SessionFactory for E {
    type Session = E::Session;

    async fn session(&self) -> Result<Self::Session> {
        Engine::session(self).await
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Logical database name
    pub database: String,

    /// Begin a session transaction implicitly on the first data operation.
    /// With this disabled, operating outside an explicit transaction is a
    /// state error.
    pub autobegin: bool,
}

impl EngineConfig {
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            autobegin: true,
        }
    }

    /// Set the database name
    pub fn database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    /// Set the autobegin behavior
    pub fn autobegin(mut self, autobegin: bool) -> Self {
        self.autobegin = autobegin;
        self
    }

    /// Parse from connection string
    ///
    /// Format: `mem://database`. An empty database segment selects the
    /// default name, mirroring `:memory:`-style URLs.
    pub fn from_url(url: &str) -> Result<Self> {
        let Some(rest) = url.strip_prefix("mem://") else {
            return Err(TxError::Config(format!(
                "URL must start with 'mem://', got '{}'",
                url
            )));
        };

        let database = match rest {
            "" | ":memory:" => "memory",
            name => name,
        };

        if database.contains('/') {
            return Err(TxError::Config(format!(
                "Invalid database name '{}'",
                database
            )));
        }

        Ok(Self::new(database))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(TxError::Config("database name cannot be empty".into()));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("memory")
    }
}

/// Lazily yield independent in-memory engines for a connection string.
///
/// Each polled engine is a fresh, empty database; the URL is parsed once
/// up front.
pub fn engine_stream(url: &str) -> Result<impl Stream<Item = MemoryEngine>> {
    let config = EngineConfig::from_url(url)?;
    config.validate()?;

    Ok(futures::stream::unfold(config, |config| async move {
        let engine = MemoryEngine::with_config(config.clone());
        Some((engine, config))
    }))
}
