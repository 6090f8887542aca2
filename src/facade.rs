//! Filesystem facade
//!
//! [`RemoteVfs`] is the public surface: immediate queries (`iterdir`,
//! `exists`, `is_dir`, attribute accessors) answered from listings and the
//! stat cache, plus compound operations (`prepare_copy`, `prepare_move`,
//! `prepare_delete`) decomposed into ordered [`TaskBatch`]es for the host's
//! worker pool. All state lives in explicit, injected components — no
//! process-wide singletons — so isolated instances can coexist, not least
//! in tests.
//!
//! Transfer routing: a remote↔local pair streams through the session's
//! get/put primitives; a same-backend-same-host move uses the protocol's
//! native rename; every other pair stages through a local temp file. There
//! is no server-to-server path, even between two hosts of the same scheme.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::future::BoxFuture;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::cache::{Attr, AttrValue, StatCache, StatRecord};
use crate::config::{ChangeNotifier, HostHistory, HostLookup};
use crate::connect::ConnectionRegistry;
use crate::error::VfsError;
use crate::listing::ListingEntry;
use crate::path::{Backend, VirtualPath};
use crate::task::{Task, TaskBatch, TaskControl};

/// The virtual filesystem facade. Cheap to clone; all parts are shared.
#[derive(Clone)]
pub struct RemoteVfs {
    registry: Arc<ConnectionRegistry>,
    cache: Arc<StatCache>,
    lookup: Arc<dyn HostLookup>,
    history: Arc<dyn HostHistory>,
    notifier: Arc<dyn ChangeNotifier>,
}

impl RemoteVfs {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        lookup: Arc<dyn HostLookup>,
        history: Arc<dyn HostHistory>,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> Self {
        Self {
            registry,
            cache: Arc::new(StatCache::new()),
            lookup,
            history,
            notifier,
        }
    }

    /// The connection registry, for explicit disconnects and liveness
    /// queries from the host application.
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Known host names for a backend, in configuration order.
    pub fn known_hosts(&self, backend: Backend) -> Vec<String> {
        match backend {
            Backend::Local => Vec::new(),
            Backend::Sftp => self.lookup.known_hosts(),
            Backend::Ftp => self.history.known_hosts(),
        }
    }

    /// Whether `name` may appear as the first segment of a location.
    pub fn is_host_segment(&self, backend: Backend, name: &str) -> bool {
        match backend {
            Backend::Local => false,
            Backend::Sftp => self.lookup.lookup(name).is_some(),
            Backend::Ftp => self.history.load().contains_key(name),
        }
    }

    /// List a directory. The backend root yields the known host names;
    /// anywhere else acquires the host's session, parses the listing,
    /// refreshes the cache for every entry and yields the names.
    pub async fn iterdir(&self, path: &VirtualPath) -> Result<Vec<String>, VfsError> {
        match path.backend() {
            Backend::Local => {
                let mut read_dir = tokio::fs::read_dir(path.path())
                    .await
                    .map_err(|e| local_err(e, path))?;
                let mut names = Vec::new();
                while let Some(entry) = read_dir.next_entry().await? {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
                names.sort();
                Ok(names)
            }
            backend => {
                if path.is_root() {
                    return Ok(self.known_hosts(backend));
                }
                self.validate(path)?;
                let host = expect_host(path)?;
                let session = self.registry.acquire(backend, host).await?;
                let entries = session.lock().await.list_dir(path.path()).await?;

                // A fresh listing replaces everything previously known
                // about this directory's children in one go.
                self.cache.clear_children(&path.cache_key());
                let mut names = Vec::with_capacity(entries.len());
                for entry in &entries {
                    let child = path.join(&entry.name);
                    self.cache
                        .put_record(&child.cache_key(), &record_from(entry));
                    names.push(entry.name.clone());
                }
                debug!("Listed {} entries in {}", names.len(), path);
                Ok(names)
            }
        }
    }

    /// Whether the path is known to exist. The backend root and host-level
    /// paths are always present; everything else is answered from the
    /// cache, defaulting to `false` on a miss. Never touches the network.
    pub async fn exists(&self, path: &VirtualPath) -> bool {
        match path.backend() {
            Backend::Local => tokio::fs::metadata(path.path()).await.is_ok(),
            _ => {
                if path.is_root() || path.is_host_root() {
                    return true;
                }
                self.cache.is_dir(&path.cache_key()).is_some()
            }
        }
    }

    /// Whether the path is a directory; same cache semantics as
    /// [`exists`](RemoteVfs::exists).
    pub async fn is_dir(&self, path: &VirtualPath) -> bool {
        match path.backend() {
            Backend::Local => tokio::fs::metadata(path.path())
                .await
                .map(|meta| meta.is_dir())
                .unwrap_or(false),
            _ => {
                if path.is_root() || path.is_host_root() {
                    return true;
                }
                self.cache.is_dir(&path.cache_key()).unwrap_or(false)
            }
        }
    }

    /// Create a remote directory. Fails with `AlreadyExists` when the
    /// target already reports as a directory and with `InvalidPath` when
    /// the location cannot name a directory at all.
    pub async fn mkdir(&self, path: &VirtualPath) -> Result<(), VfsError> {
        if path.backend() == Backend::Local {
            return tokio::fs::create_dir(path.path())
                .await
                .map_err(|e| local_err(e, path));
        }
        self.ensure_operable(path)?;
        if self.is_dir(path).await {
            return Err(VfsError::AlreadyExists(path.to_string()));
        }
        let session = self
            .registry
            .acquire(path.backend(), expect_host(path)?)
            .await?;
        session.lock().await.create_dir(path.path()).await?;

        self.cache
            .put(&path.cache_key(), Attr::IsDir, AttrValue::Bool(true));
        self.notifier.notify_added(path);
        info!("Created directory {}", path);
        Ok(())
    }

    /// Create an empty file. Fails with `AlreadyExists` when the path is
    /// already known and with `InvalidPath` when the location is invalid.
    pub async fn touch(&self, path: &VirtualPath) -> Result<(), VfsError> {
        if path.backend() == Backend::Local {
            tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path.path())
                .await
                .map_err(|e| local_err(e, path))?;
            return Ok(());
        }
        self.ensure_operable(path)?;
        if self.exists(path).await {
            return Err(VfsError::AlreadyExists(path.to_string()));
        }

        // A zero-byte upload of a scratch file; both protocols lack a
        // dedicated create-empty primitive.
        let staging = NamedTempFile::new()?;
        let session = self
            .registry
            .acquire(path.backend(), expect_host(path)?)
            .await?;
        session
            .lock()
            .await
            .upload(staging.path(), path.path(), Arc::new(TaskControl::new()))
            .await?;

        let key = path.cache_key();
        self.cache.put(&key, Attr::IsDir, AttrValue::Bool(false));
        self.cache.put(&key, Attr::Size, AttrValue::Size(0));
        self.notifier.notify_added(path);
        Ok(())
    }

    pub fn size_bytes(&self, path: &VirtualPath) -> Option<u64> {
        self.cache.size(&path.cache_key())
    }

    pub fn modified(&self, path: &VirtualPath) -> Option<DateTime<Utc>> {
        self.cache.modified(&path.cache_key())
    }

    pub fn permissions(&self, path: &VirtualPath) -> Option<String> {
        self.cache.permissions(&path.cache_key())
    }

    pub fn owner(&self, path: &VirtualPath) -> Option<String> {
        self.cache.owner(&path.cache_key())
    }

    pub fn group(&self, path: &VirtualPath) -> Option<String> {
        self.cache.group(&path.cache_key())
    }

    /// Decompose a copy into one ordered batch: for a directory, a task
    /// creating the destination directory followed by the children's tasks
    /// in listing order; for a file, a single transfer task with its size
    /// resolved up front for progress reporting.
    pub async fn prepare_copy(
        &self,
        src: &VirtualPath,
        dst: &VirtualPath,
    ) -> Result<TaskBatch, VfsError> {
        self.check_route(src, dst)?;
        self.ensure_operable(src)?;
        self.ensure_operable(dst)?;

        let mut batch = TaskBatch::new();
        self.decompose_copy(src.clone(), dst.clone(), &mut batch)
            .await?;
        Ok(batch)
    }

    /// Decompose a move. Both ends on the same backend and host become a
    /// single native-rename task; anything else falls back to a copy batch
    /// followed by a delete batch — the second batch must not start until
    /// the first has fully completed, so the source never disappears before
    /// every piece of it has arrived.
    pub async fn prepare_move(
        &self,
        src: &VirtualPath,
        dst: &VirtualPath,
    ) -> Result<Vec<TaskBatch>, VfsError> {
        self.check_route(src, dst)?;
        self.ensure_operable(src)?;
        self.ensure_operable(dst)?;

        let same_host = src.backend() == dst.backend()
            && src.backend() != Backend::Local
            && src.host() == dst.host();
        if same_host {
            let vfs = self.clone();
            let (s, d) = (src.clone(), dst.clone());
            let task = Task::new(
                format!("Moving {}", src.name()),
                None,
                Box::new(move |_ctl| Box::pin(async move { vfs.rename_entry(&s, &d).await })),
            );
            let mut batch = TaskBatch::new();
            batch.push(task);
            return Ok(vec![batch]);
        }

        let copy = self.prepare_copy(src, dst).await?;
        let delete = self.prepare_delete(src).await?;
        Ok(vec![copy, delete])
    }

    /// Decompose a delete in strict post-order: every child's tasks come
    /// before the task removing the directory itself, so a directory is
    /// never removed while something is still inside it.
    pub async fn prepare_delete(&self, path: &VirtualPath) -> Result<TaskBatch, VfsError> {
        self.ensure_operable(path)?;
        let mut batch = TaskBatch::new();
        self.decompose_delete(path.clone(), &mut batch).await?;
        Ok(batch)
    }

    fn decompose_copy<'a>(
        &'a self,
        src: VirtualPath,
        dst: VirtualPath,
        batch: &'a mut TaskBatch,
    ) -> BoxFuture<'a, Result<(), VfsError>> {
        Box::pin(async move {
            if self.path_is_dir(&src).await? {
                let vfs = self.clone();
                let target = dst.clone();
                batch.push(Task::new(
                    format!("Creating {}", dst.name()),
                    None,
                    Box::new(move |_ctl| {
                        Box::pin(async move { vfs.ensure_dir(&target).await })
                    }),
                ));
                for name in self.iterdir(&src).await? {
                    self.decompose_copy(src.join(&name), dst.join(&name), batch)
                        .await?;
                }
            } else {
                let size = self.transfer_size(&src).await;
                let vfs = self.clone();
                let (s, d) = (src.clone(), dst.clone());
                batch.push(Task::new(
                    format!("Copying {}", src.name()),
                    size,
                    Box::new(move |ctl| {
                        Box::pin(async move { vfs.copy_file(&s, &d, ctl).await })
                    }),
                ));
            }
            Ok(())
        })
    }

    fn decompose_delete<'a>(
        &'a self,
        path: VirtualPath,
        batch: &'a mut TaskBatch,
    ) -> BoxFuture<'a, Result<(), VfsError>> {
        Box::pin(async move {
            let is_dir = self.path_is_dir(&path).await?;
            if is_dir {
                for name in self.iterdir(&path).await? {
                    self.decompose_delete(path.join(&name), batch).await?;
                }
            }
            let vfs = self.clone();
            let target = path.clone();
            batch.push(Task::new(
                format!("Deleting {}", path.name()),
                None,
                Box::new(move |_ctl| {
                    Box::pin(async move { vfs.delete_entry(&target, is_dir).await })
                }),
            ));
            Ok(())
        })
    }

    /// Execute one file transfer, routed by backend pair.
    async fn copy_file(
        &self,
        src: &VirtualPath,
        dst: &VirtualPath,
        control: Arc<TaskControl>,
    ) -> Result<(), VfsError> {
        match (src.backend(), dst.backend()) {
            (Backend::Local, Backend::Local) => Err(VfsError::UnsupportedOperation(
                "no staging route between two local paths".to_string(),
            )),
            (Backend::Local, _) => {
                let session = self
                    .registry
                    .acquire(dst.backend(), expect_host(dst)?)
                    .await?;
                let bytes = session
                    .lock()
                    .await
                    .upload(std::path::Path::new(src.path()), dst.path(), control)
                    .await?;
                self.record_arrival(dst, bytes);
                Ok(())
            }
            (_, Backend::Local) => {
                let session = self
                    .registry
                    .acquire(src.backend(), expect_host(src)?)
                    .await?;
                session
                    .lock()
                    .await
                    .download(src.path(), std::path::Path::new(dst.path()), control)
                    .await?;
                Ok(())
            }
            _ => {
                // Remote to remote, same scheme or not: always materialize
                // through a local staging file, never "server to server".
                let staging = NamedTempFile::new()?;
                let src_session = self
                    .registry
                    .acquire(src.backend(), expect_host(src)?)
                    .await?;
                src_session
                    .lock()
                    .await
                    .download(src.path(), staging.path(), Arc::clone(&control))
                    .await?;

                let dst_session = self
                    .registry
                    .acquire(dst.backend(), expect_host(dst)?)
                    .await?;
                let bytes = dst_session
                    .lock()
                    .await
                    .upload(staging.path(), dst.path(), control)
                    .await?;
                self.record_arrival(dst, bytes);
                Ok(())
            }
        }
    }

    /// Native rename on one host, transplanting the cached record instead
    /// of recreating it.
    async fn rename_entry(&self, src: &VirtualPath, dst: &VirtualPath) -> Result<(), VfsError> {
        let session = self
            .registry
            .acquire(src.backend(), expect_host(src)?)
            .await?;
        session.lock().await.rename(src.path(), dst.path()).await?;

        self.cache.transplant(&src.cache_key(), &dst.cache_key());
        self.notifier.notify_removed(src);
        self.notifier.notify_added(dst);
        info!("Moved {} -> {}", src, dst);
        Ok(())
    }

    async fn delete_entry(&self, path: &VirtualPath, is_dir: bool) -> Result<(), VfsError> {
        if path.backend() == Backend::Local {
            if is_dir {
                tokio::fs::remove_dir(path.path())
                    .await
                    .map_err(|e| local_err(e, path))?;
            } else {
                tokio::fs::remove_file(path.path())
                    .await
                    .map_err(|e| local_err(e, path))?;
            }
            return Ok(());
        }

        let session = self
            .registry
            .acquire(path.backend(), expect_host(path)?)
            .await?;
        {
            let mut guard = session.lock().await;
            if is_dir {
                guard.remove_dir(path.path()).await?;
            } else {
                guard.remove_file(path.path()).await?;
            }
        }

        let key = path.cache_key();
        if is_dir {
            self.cache.clear_children(&key);
        }
        self.cache.remove(&key);
        self.notifier.notify_removed(path);
        Ok(())
    }

    /// Create a directory if it is not already known to exist; used by the
    /// copy decomposition, where the destination tree may partially exist.
    async fn ensure_dir(&self, path: &VirtualPath) -> Result<(), VfsError> {
        if path.backend() == Backend::Local {
            return match tokio::fs::create_dir(path.path()).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
                Err(e) => Err(VfsError::Io(e)),
            };
        }
        if self.is_dir(path).await {
            return Ok(());
        }
        let session = self
            .registry
            .acquire(path.backend(), expect_host(path)?)
            .await?;
        session.lock().await.create_dir(path.path()).await?;
        self.cache
            .put(&path.cache_key(), Attr::IsDir, AttrValue::Bool(true));
        self.notifier.notify_added(path);
        Ok(())
    }

    /// Directory test for decomposition: local paths ask the filesystem,
    /// remote paths use the cached verdict (a miss means "file").
    async fn path_is_dir(&self, path: &VirtualPath) -> Result<bool, VfsError> {
        match path.backend() {
            Backend::Local => {
                let meta = tokio::fs::metadata(path.path())
                    .await
                    .map_err(|e| local_err(e, path))?;
                Ok(meta.is_dir())
            }
            _ => Ok(self.is_dir(path).await),
        }
    }

    /// Byte size for a transfer task, known up front where possible: the
    /// cache first, then one stat round-trip. Failures mean "unknown", not
    /// an error — progress reporting degrades, the transfer still runs.
    async fn transfer_size(&self, path: &VirtualPath) -> Option<u64> {
        match path.backend() {
            Backend::Local => tokio::fs::metadata(path.path())
                .await
                .ok()
                .map(|meta| meta.len()),
            backend => {
                if let Some(size) = self.cache.size(&path.cache_key()) {
                    return Some(size);
                }
                let host = path.host()?;
                let session = self.registry.acquire(backend, host).await.ok()?;
                let entry = session.lock().await.stat(path.path()).await.ok()?;
                Some(entry.size)
            }
        }
    }

    fn record_arrival(&self, dst: &VirtualPath, bytes: u64) {
        let key = dst.cache_key();
        let overwrote = self.cache.is_dir(&key).is_some();
        self.cache.put(&key, Attr::IsDir, AttrValue::Bool(false));
        self.cache.put(&key, Attr::Size, AttrValue::Size(bytes));
        if overwrote {
            self.notifier.notify_changed(dst);
        } else {
            self.notifier.notify_added(dst);
        }
    }

    /// Reject backend pairs with no staging route. Every remote pair can
    /// stage through a local temp file; two local paths are the host
    /// application's own business.
    fn check_route(&self, src: &VirtualPath, dst: &VirtualPath) -> Result<(), VfsError> {
        match (src.backend(), dst.backend()) {
            (Backend::Local, Backend::Local) => Err(VfsError::UnsupportedOperation(
                "no staging route between two local paths".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Host-segment invariant: a remote path's host must be known.
    fn validate(&self, path: &VirtualPath) -> Result<(), VfsError> {
        match path.backend() {
            Backend::Local => Ok(()),
            backend => match path.host() {
                None => Ok(()),
                Some(host) if self.is_host_segment(backend, host) => Ok(()),
                Some(host) => Err(VfsError::InvalidPath(format!("unknown host: {host}"))),
            },
        }
    }

    /// A path an operation may act on: valid, and below a host (the root
    /// and the hosts themselves are not created, copied or deleted).
    fn ensure_operable(&self, path: &VirtualPath) -> Result<(), VfsError> {
        self.validate(path)?;
        if path.backend() != Backend::Local && (path.is_root() || path.is_host_root()) {
            return Err(VfsError::InvalidPath(format!(
                "{path} does not name an entry"
            )));
        }
        Ok(())
    }
}

fn expect_host(path: &VirtualPath) -> Result<&str, VfsError> {
    path.host()
        .ok_or_else(|| VfsError::InvalidPath(format!("{path} has no host")))
}

fn record_from(entry: &ListingEntry) -> StatRecord {
    StatRecord {
        is_dir: entry.is_dir,
        size: Some(entry.size),
        modified: Utc.timestamp_opt(entry.mtime, 0).single(),
        permissions: entry.permissions.clone(),
        owner: entry.owner.clone(),
        group: entry.group.clone(),
    }
}

fn local_err(e: std::io::Error, path: &VirtualPath) -> VfsError {
    match e.kind() {
        std::io::ErrorKind::NotFound => VfsError::NotFound(path.to_string()),
        std::io::ErrorKind::AlreadyExists => VfsError::AlreadyExists(path.to_string()),
        _ => VfsError::Io(e),
    }
}
