//! Session abstraction over the transport backends
//!
//! A [`RemoteSession`] is one authenticated, live connection to one host,
//! exposing the primitive operations both protocols share. The transport
//! crates do the wire work; this trait is the seam the registry, the facade
//! and the tests all talk through.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::VfsError;
use crate::listing::ListingEntry;
use crate::path::Backend;
use crate::task::TaskControl;

/// Primitive operations of one connected session.
///
/// Sessions are not safe for concurrent command issuance; the connection
/// registry hands them out behind a per-host async mutex and every caller
/// holds the lock for the duration of one operation.
#[async_trait]
pub trait RemoteSession: Send {
    /// Lightweight liveness probe (protocol no-op). Used instead of
    /// trusting a stale handle.
    async fn probe(&mut self) -> Result<(), VfsError>;

    /// List a remote directory as normalized entries.
    async fn list_dir(&mut self, path: &str) -> Result<Vec<ListingEntry>, VfsError>;

    /// Metadata for one remote path; `NotFound` when absent.
    async fn stat(&mut self, path: &str) -> Result<ListingEntry, VfsError>;

    /// Download `remote` into the local file `local`, honoring
    /// cancellation between chunks. Returns bytes transferred. A cancelled
    /// transfer removes the partial local file before reporting
    /// [`VfsError::Cancelled`].
    async fn download(
        &mut self,
        remote: &str,
        local: &Path,
        control: Arc<TaskControl>,
    ) -> Result<u64, VfsError>;

    /// Upload the local file `local` to `remote`; same cancellation
    /// contract as [`download`](RemoteSession::download).
    async fn upload(
        &mut self,
        local: &Path,
        remote: &str,
        control: Arc<TaskControl>,
    ) -> Result<u64, VfsError>;

    /// Native rename on this host; no data transfer.
    async fn rename(&mut self, from: &str, to: &str) -> Result<(), VfsError>;

    async fn remove_file(&mut self, path: &str) -> Result<(), VfsError>;

    /// Remove an (empty) directory.
    async fn remove_dir(&mut self, path: &str) -> Result<(), VfsError>;

    async fn create_dir(&mut self, path: &str) -> Result<(), VfsError>;

    /// Close the underlying transport. Best-effort; the registry drops the
    /// session regardless of the outcome.
    async fn close(&mut self) -> Result<(), VfsError>;
}

/// Opens sessions for the connection registry.
///
/// `password` is `None` on the first attempt; after an authentication
/// failure the registry prompts once and retries with `Some(..)`. Keeping
/// the retry policy in the registry keeps it uniform across backends.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(
        &self,
        backend: Backend,
        host: &str,
        password: Option<&str>,
    ) -> Result<Box<dyn RemoteSession>, VfsError>;
}
