//! Error taxonomy shared by every storage adapter.

use thiserror::Error;

/// Boxed source error carried by infrastructure failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached at startup or on reconnect.
    #[error("connection to the {backend} backend failed: {source}")]
    Connection {
        backend: &'static str,
        #[source]
        source: BoxError,
    },
    /// The entity addressed by an identifier does not exist.
    #[error("{entity} not found")]
    NotFound { entity: &'static str },
    #[error("the user {0} already exists")]
    DuplicateEmail(String),
    #[error("relation with oneself not allowed")]
    SelfRelation,
    #[error("no user found with id {0}")]
    TargetNotFound(String),
    #[error("the relation with the user id {0} already exists")]
    AlreadyActive(String),
    #[error("invalid operation - cannot delete a non-owner tweet")]
    NotOwner,
    #[error("invalid id param: {0:?}")]
    InvalidId(String),
    #[error("the message cannot be empty")]
    EmptyMessage,
    /// Opaque failure of the underlying store, tagged with the operation.
    #[error("{context}: {source}")]
    Backend {
        context: &'static str,
        #[source]
        source: BoxError,
    },
}

impl StoreError {
    pub fn backend(context: &'static str, source: impl Into<BoxError>) -> Self {
        StoreError::Backend {
            context,
            source: source.into(),
        }
    }

    pub fn connection(backend: &'static str, source: impl Into<BoxError>) -> Self {
        StoreError::Connection {
            backend,
            source: source.into(),
        }
    }

    pub fn not_found(entity: &'static str) -> Self {
        StoreError::NotFound { entity }
    }

    /// True for failures the caller caused; false for infrastructure faults.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            StoreError::Connection { .. } | StoreError::Backend { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_keep_their_context() {
        let err = StoreError::backend("get tweets", "disk on fire");
        assert_eq!(err.to_string(), "get tweets: disk on fire");
        assert!(!err.is_client_error());
    }

    #[test]
    fn conflicts_are_client_errors() {
        assert!(StoreError::AlreadyActive("42".into()).is_client_error());
        assert!(StoreError::NotOwner.is_client_error());
        assert!(StoreError::InvalidId("zz".into()).is_client_error());
    }
}
