use thiserror::Error;

#[derive(Error, Debug)]
pub enum TxError {
    #[error("Transaction state error: {0}")]
    TransactionState(String),

    /// Wrapper for failures from an external session backend (driver I/O,
    /// lost connections). The in-memory engine never produces it; real
    /// `AsyncSession` implementations map their transport errors here.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_errors_wrap_as_persistence() {
        fn flaky_backend() -> Result<()> {
            Err(TxError::Persistence("connection reset by peer".into()))
        }

        let err = flaky_backend().unwrap_err();
        assert!(matches!(err, TxError::Persistence(_)));
        assert_eq!(
            err.to_string(),
            "Persistence error: connection reset by peer"
        );
    }
}
