//! Connection lifecycle management
//!
//! At most one live session exists per (backend, host). Sessions are
//! created lazily on first use, probed for liveness before reuse (a stale
//! handle is never trusted), and closed either explicitly or when a probe
//! fails. Because the underlying protocols are not safe for concurrent
//! command issuance, every session is wrapped in an async mutex — that
//! per-host serialization is a correctness requirement, not a tuning knob.

pub mod ftp;
pub mod sftp;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{CredentialPrompt, HostHistory, HostLookup};
use crate::error::VfsError;
use crate::listing::ListingParser;
use crate::path::Backend;
use crate::session::{RemoteSession, SessionFactory};

use ftp::FtpUrl;

/// One session, shared behind the per-host lock.
pub type SharedSession = Arc<Mutex<Box<dyn RemoteSession>>>;

type HostKey = (Backend, String);

/// Owns every live session, one per (backend, host).
pub struct ConnectionRegistry {
    sessions: DashMap<HostKey, SharedSession>,
    /// Serializes connection establishment so two racing acquires cannot
    /// open two sessions to the same host.
    connecting: Mutex<()>,
    factory: Arc<dyn SessionFactory>,
    prompt: Arc<dyn CredentialPrompt>,
}

impl ConnectionRegistry {
    pub fn new(factory: Arc<dyn SessionFactory>, prompt: Arc<dyn CredentialPrompt>) -> Self {
        Self {
            sessions: DashMap::new(),
            connecting: Mutex::new(()),
            factory,
            prompt,
        }
    }

    /// Get the live session for `host`, connecting if necessary.
    ///
    /// Idempotent: an existing session is liveness-probed and reused; a
    /// dead one is dropped and replaced. On authentication failure the
    /// credential prompt is consulted exactly once (for a password) before
    /// the failure becomes the caller's problem. A cancelled prompt fails
    /// immediately.
    pub async fn acquire(&self, backend: Backend, host: &str) -> Result<SharedSession, VfsError> {
        let key = (backend, host.to_string());

        if let Some(session) = self.live_session(&key).await {
            return Ok(session);
        }

        let _guard = self.connecting.lock().await;
        // Someone else may have connected while we waited for the guard.
        if let Some(session) = self.live_session(&key).await {
            return Ok(session);
        }

        info!("Connecting to {}://{}", backend, host);
        let session = match self.factory.connect(backend, host, None).await {
            Ok(session) => session,
            Err(VfsError::AuthenticationFailed(reason)) => {
                warn!("Authentication failed for {}: {}", host, reason);
                let password = self
                    .prompt
                    .prompt_text(&format!("Password for {host}"))
                    .await
                    .ok_or(VfsError::AuthenticationFailed(reason))?;
                self.factory.connect(backend, host, Some(&password)).await?
            }
            Err(e) => return Err(e),
        };
        info!("Connected to {}://{}", backend, host);

        let shared: SharedSession = Arc::new(Mutex::new(session));
        self.sessions.insert(key, Arc::clone(&shared));
        Ok(shared)
    }

    /// Whether a live, authenticated session exists for `host`. Probes the
    /// session rather than trusting the map; a failed probe evicts it.
    pub async fn is_connected(&self, backend: Backend, host: &str) -> bool {
        self.live_session(&(backend, host.to_string())).await.is_some()
    }

    /// Explicitly close and drop the session for `host`. Errors on close
    /// are swallowed: the session is removed regardless of the outcome.
    pub async fn release(&self, backend: Backend, host: &str) {
        let key = (backend, host.to_string());
        if let Some((_, session)) = self.sessions.remove(&key) {
            let mut guard = session.lock().await;
            if let Err(e) = guard.close().await {
                warn!("Error closing session for {}: {}", host, e);
            }
            debug!("Released session for {}://{}", backend, host);
        }
    }

    /// Hosts with a registered session on `backend`, without probing.
    pub fn active_hosts(&self, backend: Backend) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|entry| entry.key().0 == backend)
            .map(|entry| entry.key().1.clone())
            .collect()
    }

    async fn live_session(&self, key: &HostKey) -> Option<SharedSession> {
        // Clone out of the map before awaiting; holding a DashMap ref
        // across an await point can deadlock against writers.
        let session = self.sessions.get(key).map(|entry| Arc::clone(&entry))?;
        let alive = session.lock().await.probe().await.is_ok();
        if alive {
            Some(session)
        } else {
            warn!("Session for {}://{} is dead, dropping it", key.0, key.1);
            self.sessions.remove(key);
            None
        }
    }
}

/// The production [`SessionFactory`]: SFTP hosts resolve through the SSH
/// config lookup, FTP hosts through the host history.
pub struct TransportFactory {
    lookup: Arc<dyn HostLookup>,
    history: Arc<dyn HostHistory>,
    prompt: Arc<dyn CredentialPrompt>,
    parser: Arc<ListingParser>,
}

impl TransportFactory {
    pub fn new(
        lookup: Arc<dyn HostLookup>,
        history: Arc<dyn HostHistory>,
        prompt: Arc<dyn CredentialPrompt>,
    ) -> Self {
        Self {
            lookup,
            history,
            prompt,
            parser: Arc::new(ListingParser::new()),
        }
    }
}

#[async_trait]
impl SessionFactory for TransportFactory {
    async fn connect(
        &self,
        backend: Backend,
        host: &str,
        password: Option<&str>,
    ) -> Result<Box<dyn RemoteSession>, VfsError> {
        match backend {
            Backend::Sftp => {
                // A host that dropped out of the SSH config is an explicit
                // failure, not a silent skip.
                let profile = self.lookup.lookup(host).ok_or_else(|| {
                    VfsError::ConnectionFailed(format!("no SSH configuration for host {host}"))
                })?;
                let user = match profile.user.clone() {
                    Some(user) => user,
                    None => self
                        .prompt
                        .prompt_text(&format!("User name for {host}"))
                        .await
                        .ok_or_else(|| {
                            VfsError::ConnectionFailed(format!("user name required for {host}"))
                        })?,
                };
                let session = sftp::connect(&profile, &user, password).await?;
                Ok(Box::new(session))
            }
            Backend::Ftp => {
                let url = FtpUrl::parse(&self.history.url_for(host))?;
                let session =
                    ftp::connect(host, &url, password, Arc::clone(&self.parser)).await?;
                Ok(Box::new(session))
            }
            Backend::Local => Err(VfsError::UnsupportedOperation(
                "the local backend needs no session".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::listing::ListingEntry;
    use crate::task::TaskControl;

    struct StubSession {
        alive: bool,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RemoteSession for StubSession {
        async fn probe(&mut self) -> Result<(), VfsError> {
            if self.alive {
                Ok(())
            } else {
                Err(VfsError::ConnectionFailed("gone".to_string()))
            }
        }

        async fn list_dir(&mut self, _path: &str) -> Result<Vec<ListingEntry>, VfsError> {
            Ok(Vec::new())
        }

        async fn stat(&mut self, path: &str) -> Result<ListingEntry, VfsError> {
            Err(VfsError::NotFound(path.to_string()))
        }

        async fn download(
            &mut self,
            _remote: &str,
            _local: &std::path::Path,
            _control: Arc<TaskControl>,
        ) -> Result<u64, VfsError> {
            Ok(0)
        }

        async fn upload(
            &mut self,
            _local: &std::path::Path,
            _remote: &str,
            _control: Arc<TaskControl>,
        ) -> Result<u64, VfsError> {
            Ok(0)
        }

        async fn rename(&mut self, _from: &str, _to: &str) -> Result<(), VfsError> {
            Ok(())
        }

        async fn remove_file(&mut self, _path: &str) -> Result<(), VfsError> {
            Ok(())
        }

        async fn remove_dir(&mut self, _path: &str) -> Result<(), VfsError> {
            Ok(())
        }

        async fn create_dir(&mut self, _path: &str) -> Result<(), VfsError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), VfsError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StubFactory {
        connects: AtomicUsize,
        auth_failures_left: AtomicUsize,
        closed: Arc<AtomicUsize>,
    }

    impl StubFactory {
        fn new(auth_failures: usize) -> Self {
            Self {
                connects: AtomicUsize::new(0),
                auth_failures_left: AtomicUsize::new(auth_failures),
                closed: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl SessionFactory for StubFactory {
        async fn connect(
            &self,
            _backend: Backend,
            _host: &str,
            password: Option<&str>,
        ) -> Result<Box<dyn RemoteSession>, VfsError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if password.is_none()
                && self
                    .auth_failures_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(VfsError::AuthenticationFailed("denied".to_string()));
            }
            Ok(Box::new(StubSession {
                alive: true,
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    struct CountingPrompt {
        asked: AtomicUsize,
        answer: Option<String>,
    }

    #[async_trait]
    impl CredentialPrompt for CountingPrompt {
        async fn prompt_text(&self, _message: &str) -> Option<String> {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    #[tokio::test]
    async fn test_acquire_reuses_live_session() {
        let factory = Arc::new(StubFactory::new(0));
        let registry =
            ConnectionRegistry::new(Arc::clone(&factory) as _, Arc::new(crate::config::NoPrompt));

        let first = registry.acquire(Backend::Sftp, "box").await.unwrap();
        let second = registry.acquire(Backend::Sftp, "box").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.connects.load(Ordering::SeqCst), 1);
        assert!(registry.is_connected(Backend::Sftp, "box").await);
        assert_eq!(registry.active_hosts(Backend::Sftp), vec!["box"]);
    }

    #[tokio::test]
    async fn test_auth_failure_prompts_once_then_succeeds() {
        let factory = Arc::new(StubFactory::new(1));
        let prompt = Arc::new(CountingPrompt {
            asked: AtomicUsize::new(0),
            answer: Some("hunter2".to_string()),
        });
        let registry = ConnectionRegistry::new(Arc::clone(&factory) as _, Arc::clone(&prompt) as _);

        registry.acquire(Backend::Ftp, "box").await.unwrap();
        assert_eq!(prompt.asked.load(Ordering::SeqCst), 1);
        assert_eq!(factory.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_prompt_fails_auth() {
        let factory = Arc::new(StubFactory::new(1));
        let prompt = Arc::new(CountingPrompt {
            asked: AtomicUsize::new(0),
            answer: None,
        });
        let registry = ConnectionRegistry::new(Arc::clone(&factory) as _, Arc::clone(&prompt) as _);

        let err = registry.acquire(Backend::Sftp, "box").await.err().unwrap();
        assert!(matches!(err, VfsError::AuthenticationFailed(_)));
        assert_eq!(factory.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_closes_and_forgets() {
        let factory = Arc::new(StubFactory::new(0));
        let registry =
            ConnectionRegistry::new(Arc::clone(&factory) as _, Arc::new(crate::config::NoPrompt));

        registry.acquire(Backend::Sftp, "box").await.unwrap();
        registry.release(Backend::Sftp, "box").await;
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
        assert!(registry.active_hosts(Backend::Sftp).is_empty());

        // Releasing an unknown host is a no-op.
        registry.release(Backend::Sftp, "elsewhere").await;
    }
}
