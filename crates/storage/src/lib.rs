//! Storage Layer
//!
//! In-memory reference implementation of the persistence collaborator:
//! driver profiles (`ProfileStore`) and the event log (`EventSink`).

mod repository;

pub use repository::Repository;

use alerting::AlertError;
use driver_auth::AuthError;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Record not found")]
    NotFound,
    #[error("Duplicate user id {0}")]
    Duplicate(u32),
}

impl From<StorageError> for AuthError {
    fn from(e: StorageError) -> Self {
        AuthError::Store(e.to_string())
    }
}

impl From<StorageError> for AlertError {
    fn from(e: StorageError) -> Self {
        AlertError::Sink(e.to_string())
    }
}
