//! Host configuration and collaborator interfaces
//!
//! The facade talks to its host application through three narrow traits:
//! host-name resolution ([`HostLookup`]), interactive credential prompting
//! ([`CredentialPrompt`]) and change notification ([`ChangeNotifier`]).
//! Default implementations are provided where the behavior is well-known
//! (`~/.ssh/config` parsing, a JSON host history); no-op stand-ins cover
//! headless use and tests.

pub mod host_history;
pub mod ssh_config;

use async_trait::async_trait;

use crate::path::VirtualPath;

pub use host_history::{HostHistory, JsonHostHistory, MemoryHostHistory};
pub use ssh_config::SshConfig;

/// Connection parameters for one logical host.
#[derive(Debug, Clone, Default)]
pub struct HostProfile {
    /// Logical name the user addresses the host by.
    pub name: String,
    /// Network address to actually connect to.
    pub address: String,
    pub port: u16,
    /// Login user; prompted for when absent.
    pub user: Option<String>,
    /// Private key path for public-key authentication.
    pub identity_file: Option<String>,
    /// Command whose stdio carries the SSH transport, `%h`/`%p` expanded.
    pub proxy_command: Option<String>,
}

/// Read-only resolution of logical host names to connection parameters.
pub trait HostLookup: Send + Sync {
    /// Resolve one host; `None` when the name is not configured.
    fn lookup(&self, host_name: &str) -> Option<HostProfile>;

    /// All configured host names, in configuration order.
    fn known_hosts(&self) -> Vec<String>;
}

/// Interactive prompt for a single text value (username, password).
///
/// Consulted only on first-connect failure; `None` means the user
/// cancelled, which fails the connection attempt instead of retrying.
#[async_trait]
pub trait CredentialPrompt: Send + Sync {
    async fn prompt_text(&self, message: &str) -> Option<String>;
}

/// Prompt that always cancels. For headless use and tests.
pub struct NoPrompt;

#[async_trait]
impl CredentialPrompt for NoPrompt {
    async fn prompt_text(&self, _message: &str) -> Option<String> {
        None
    }
}

/// Fire-and-forget change notification, called after every cache-mutating
/// operation so the host UI can refresh the affected panes.
pub trait ChangeNotifier: Send + Sync {
    fn notify_added(&self, path: &VirtualPath);
    fn notify_removed(&self, path: &VirtualPath);
    fn notify_changed(&self, path: &VirtualPath);
}

/// Notifier that drops every event.
pub struct NullNotifier;

impl ChangeNotifier for NullNotifier {
    fn notify_added(&self, _path: &VirtualPath) {}
    fn notify_removed(&self, _path: &VirtualPath) {}
    fn notify_changed(&self, _path: &VirtualPath) {}
}
