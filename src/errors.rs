use thiserror::Error;

use crate::models::ModelError;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The caller's cancellation token fired before storage answered.
    #[error("operation cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row carries a status or type this crate does not know.
    #[error("invalid stored value: {0}")]
    Model(#[from] ModelError),

    #[error("duplicate key: {0}")]
    Duplicate(uuid::Uuid),

    #[error("foreign key violation: {0}")]
    ForeignKey(String),

    /// Raised by in-process stores and test doubles standing in for a database fault.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StoreError::Cancelled)
    }

    /// Short machine-readable code for log fields.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Cancelled => "cancelled",
            StoreError::Database(_) => "database",
            StoreError::Migration(_) => "migration",
            StoreError::Model(_) => "model",
            StoreError::Duplicate(_) => "duplicate",
            StoreError::ForeignKey(_) => "foreign_key",
            StoreError::Unavailable(_) => "unavailable",
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
