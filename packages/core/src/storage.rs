//! The storage contract shared by inventory backends.

use thiserror::Error;

use crate::change::Modification;
use crate::query::{Param, QueryResult};
use crate::value::{Map, Value};

/// Errors surfaced by a storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The dotted key did not resolve to anything.
    #[error("key {0:?} not found")]
    NotFound(String),

    /// The storage does not implement the requested operation.
    #[error("operation {operation:?} is not supported: {message}")]
    Unsupported {
        operation: &'static str,
        message: String,
    },

    /// A filesystem fault during refresh.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// An invariant the storage relies on was violated.
    #[error("{0}")]
    Internal(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// A hierarchy of arbitrary depth addressed by dot-delimited keys.
///
/// Elements of sequences are addressed by numeric segments. Every
/// data-returning call also returns the modifications produced by the eager
/// refresh it may have triggered, so that a caller forwarding events to a
/// transport never misses a change observed on its own read path.
///
/// Implementations are internally synchronized; the trait is object-safe.
pub trait Storage: Send + Sync {
    /// Find a value using a dot-delimited key.
    ///
    /// Returns the modifications made since the storage was last accessed
    /// together with the value, or `None` if the key resolves to nothing.
    ///
    /// # Errors
    ///
    /// Returns a fault when the underlying source cannot be refreshed.
    fn get(&self, key: &str) -> Result<(Vec<Modification>, Option<Value>), StorageError>;

    /// Run a parameterized query against the value at `key`.
    ///
    /// Returns `None` when the key does not address a queryable (non-empty
    /// sequence) resource or nothing matches.
    ///
    /// # Errors
    ///
    /// Returns a fault when the underlying source cannot be refreshed.
    fn query(
        &self,
        key: &str,
        params: &Map,
    ) -> Result<(Vec<Modification>, Option<QueryResult>), StorageError>;

    /// The set of parameters accepted by `query` at `key`, in a predictable
    /// order. Empty when the key is not queryable.
    fn query_keys(&self, key: &str) -> Vec<Param>;

    /// Store `model` under `key`.
    ///
    /// # Errors
    ///
    /// `NotFound` when the key resolves to nothing; backends may also reject
    /// the operation as unsupported.
    fn set(&self, key: &str, model: &Map) -> Result<Vec<Modification>, StorageError>;

    /// Delete the value under `key`.
    ///
    /// # Errors
    ///
    /// `NotFound` when the key resolves to nothing; backends may also reject
    /// the operation as unsupported.
    fn delete(&self, key: &str) -> Result<Vec<Modification>, StorageError>;
}

impl<T: Storage + ?Sized> Storage for std::sync::Arc<T> {
    fn get(&self, key: &str) -> Result<(Vec<Modification>, Option<Value>), StorageError> {
        self.as_ref().get(key)
    }

    fn query(
        &self,
        key: &str,
        params: &Map,
    ) -> Result<(Vec<Modification>, Option<QueryResult>), StorageError> {
        self.as_ref().query(key, params)
    }

    fn query_keys(&self, key: &str) -> Vec<Param> {
        self.as_ref().query_keys(key)
    }

    fn set(&self, key: &str, model: &Map) -> Result<Vec<Modification>, StorageError> {
        self.as_ref().set(key, model)
    }

    fn delete(&self, key: &str) -> Result<Vec<Modification>, StorageError> {
        self.as_ref().delete(key)
    }
}
