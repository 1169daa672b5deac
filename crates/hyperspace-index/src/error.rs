use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("index kind {0:?} already installed")]
    AlreadyInstalled(hyperspace_core::IndexKind),
    #[error("index kind {0:?} not installed")]
    NotInstalled(hyperspace_core::IndexKind),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("corrupt on-disk index: {0}")]
    Corrupt(String),
}
