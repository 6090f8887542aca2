//! oxidefs — a virtual remote-filesystem layer
//!
//! Unifies SFTP and classic FTP behind one filesystem-like interface:
//!
//! - **Listing parser** — normalizes the six wild-grown `LIST` dialects
//!   (Unix, NetWare, NetPresenz, EPLF, MultiNet, MSDOS) into one record
//!   type, including resolution of year-less and 12-hour timestamps.
//! - **Stat cache** — path-keyed last-known metadata, written by listings,
//!   read by the facade's existence/attribute queries without network I/O.
//! - **Connection registry** — one lazily-opened, liveness-probed session
//!   per (backend, host), serialized behind a per-host lock, with a single
//!   uniform credential-prompt retry on authentication failure.
//! - **Task decomposition** — directory-level copy/move/delete expand into
//!   ordered batches of atomic, cancellable per-file tasks, with
//!   cross-backend transfers staged through a local temp file.
//!
//! The host application supplies the collaborators ([`CredentialPrompt`],
//! [`ChangeNotifier`], host configuration) and runs the produced tasks on
//! its own worker pool:
//!
//! ```no_run
//! use std::sync::Arc;
//! use oxidefs::{
//!     Backend, ConnectionRegistry, JsonHostHistory, NoPrompt, NullNotifier,
//!     RemoteVfs, SshConfig, TransportFactory, VirtualPath,
//! };
//!
//! # async fn run() -> Result<(), oxidefs::VfsError> {
//! let lookup = Arc::new(SshConfig::load(None).await?);
//! let history = Arc::new(JsonHostHistory::new("ftp_hosts.json".into()));
//! let prompt = Arc::new(NoPrompt);
//! let factory = Arc::new(TransportFactory::new(
//!     lookup.clone(),
//!     history.clone(),
//!     prompt.clone(),
//! ));
//! let registry = Arc::new(ConnectionRegistry::new(factory, prompt));
//! let vfs = RemoteVfs::new(registry, lookup, history, Arc::new(NullNotifier));
//!
//! for name in vfs.iterdir(&VirtualPath::parse(Backend::Sftp, "myhost")?).await? {
//!     println!("{name}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod connect;
pub mod error;
pub mod facade;
pub mod listing;
pub mod path;
pub mod session;
pub mod task;

pub use cache::{StatCache, StatRecord};
pub use config::{
    ChangeNotifier, CredentialPrompt, HostHistory, HostLookup, HostProfile, JsonHostHistory,
    MemoryHostHistory, NoPrompt, NullNotifier, SshConfig,
};
pub use connect::{ConnectionRegistry, SharedSession, TransportFactory};
pub use error::VfsError;
pub use facade::RemoteVfs;
pub use listing::{ListingEntry, ListingParser, TimeResolver};
pub use path::{Backend, VirtualPath};
pub use session::{RemoteSession, SessionFactory};
pub use task::{Task, TaskBatch, TaskControl};
