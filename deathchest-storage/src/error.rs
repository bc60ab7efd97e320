//! Error types for the death chest storage layer.

use thiserror::Error;

/// Errors returned by [`DataStore`](crate::DataStore) operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("datastore is not initialized")]
    NotInitialized,

    #[error("death chest owner identity is missing or invalid")]
    InvalidOwnerIdentity,

    #[error("{operation} failed: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Wrap and log a backend failure. `target` names the key or resource involved.
    pub(crate) fn backend(
        operation: &'static str,
        target: impl std::fmt::Display,
        source: impl Into<BackendError>,
    ) -> Self {
        let source = source.into();
        log::error!("{} failed for {}: {}", operation, target, source);
        StorageError::Backend { operation, source }
    }
}

/// Lower-level failure wrapped by [`StorageError::Backend`].
#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),

    #[error(transparent)]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error(transparent)]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Why a stored identifier could not be turned into a [`uuid::Uuid`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("identifier is missing")]
    Missing,

    #[error("identifier {0:?} is not a valid UUID")]
    Malformed(String),
}
