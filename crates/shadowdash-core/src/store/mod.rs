//! Shadow store boundary.
//!
//! The shadow store is the external document database holding the
//! `desired`/`reported` documents. It provides single reads, per-document
//! read-modify-write transactions and per-document realtime listeners.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::{Fields, ShadowPath};

pub mod firestore;
mod memory;
mod reconnect;

pub use firestore::FirestoreShadowStore;
pub use memory::MemoryShadowStore;
pub use reconnect::ReconnectPolicy;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Transaction on {path} aborted after {attempts} attempt(s) due to contention")]
    Contention { path: String, attempts: u32 },
    #[error("Commit aborted by the store: {0}")]
    Aborted(String),
    #[error("Listener for {0} disconnected")]
    Disconnected(String),
    #[error("Store is not authenticated")]
    Unauthenticated,
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Store HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Store API error: {0}")]
    Api(String),
    #[error("Invalid document payload: {0}")]
    InvalidPayload(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Full state of one document at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: ShadowPath,
    /// `None` when the document does not exist.
    pub fields: Option<Fields>,
    pub update_time: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub const fn missing(path: ShadowPath) -> Self {
        Self {
            path,
            fields: None,
            update_time: None,
        }
    }

    pub const fn exists(&self) -> bool {
        self.fields.is_some()
    }
}

/// A single document write.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentWrite {
    pub fields: Fields,
    /// Preserve fields not named in `fields` instead of replacing the document.
    pub merge: bool,
}

impl DocumentWrite {
    pub const fn merge(fields: Fields) -> Self {
        Self {
            fields,
            merge: true,
        }
    }

    pub const fn replace(fields: Fields) -> Self {
        Self {
            fields,
            merge: false,
        }
    }
}

/// Computes the write of a transaction from the document's pre-image.
///
/// Stores may call the mutator more than once when a commit loses a race.
pub type Mutator<'a> = &'a (dyn Fn(&Snapshot) -> DocumentWrite + Send + Sync);

/// Realtime sequence of document snapshots.
///
/// The first item is the snapshot at subscription time. The stream yields an
/// error and ends when the underlying connection drops. Dropping the stream
/// stops delivery.
pub struct SnapshotStream {
    receiver: mpsc::Receiver<StoreResult<Snapshot>>,
    task: Option<JoinHandle<()>>,
}

impl SnapshotStream {
    pub fn new(receiver: mpsc::Receiver<StoreResult<Snapshot>>, task: JoinHandle<()>) -> Self {
        Self {
            receiver,
            task: Some(task),
        }
    }

    pub async fn next(&mut self) -> Option<StoreResult<Snapshot>> {
        self.receiver.recv().await
    }
}

impl Drop for SnapshotStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for SnapshotStream {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("SnapshotStream").finish_non_exhaustive()
    }
}

/// Document database holding device shadows.
#[async_trait]
pub trait ShadowStore: Send + Sync + 'static {
    /// Read the current document.
    async fn get(&self, path: &ShadowPath) -> StoreResult<Snapshot>;

    /// Write a document outside of a transaction.
    async fn set(&self, path: &ShadowPath, write: DocumentWrite) -> StoreResult<Snapshot>;

    /// Atomically read the document, compute a write and commit it.
    ///
    /// A commit whose pre-image changed before it landed never succeeds.
    /// Returns the committed document.
    async fn run_transaction(
        &self,
        path: &ShadowPath,
        mutator: Mutator<'_>,
    ) -> StoreResult<Snapshot>;

    /// Start a realtime listener. Must be called from within a Tokio runtime.
    fn listen(&self, path: &ShadowPath) -> StoreResult<SnapshotStream>;
}
