//! SFTP backend
//!
//! Opens an SSH connection with russh, requests the `sftp` subsystem and
//! drives it through russh-sftp. Host parameters come from the SSH config
//! lookup; a configured `ProxyCommand` is honored by speaking SSH over the
//! spawned process's stdio.

use std::io;
use std::net::ToSocketAddrs;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::PublicKey;
use russh::Disconnect;
use russh_sftp::client::SftpSession as RusshSftpSession;
use russh_sftp::protocol::{FileAttributes, OpenFlags};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info};

use crate::config::HostProfile;
use crate::error::VfsError;
use crate::listing::ListingEntry;
use crate::session::RemoteSession;
use crate::task::TaskControl;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSFER_CHUNK: usize = 256 * 1024;

/// One authenticated SFTP session.
pub struct SftpSession {
    handle: client::Handle<ClientHandler>,
    sftp: RusshSftpSession,
    host: String,
}

/// Connect to `profile` and open the SFTP subsystem.
///
/// `password` is `Some` only on the registry's single post-prompt retry;
/// the first attempt authenticates with the configured identity file.
pub async fn connect(
    profile: &HostProfile,
    user: &str,
    password: Option<&str>,
) -> Result<SftpSession, VfsError> {
    let config = Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        ..Default::default()
    });
    let handler = ClientHandler {
        host: profile.address.clone(),
    };

    let mut handle = if let Some(proxy) = &profile.proxy_command {
        let stream = spawn_proxy(proxy, &profile.address, profile.port)?;
        tokio::time::timeout(
            CONNECT_TIMEOUT,
            client::connect_stream(config, stream, handler),
        )
        .await
        .map_err(|_| VfsError::ConnectionFailed("connection timed out".to_string()))??
    } else {
        let addr = format!("{}:{}", profile.address, profile.port);
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| VfsError::ConnectionFailed(format!("failed to resolve {addr}: {e}")))?
            .next()
            .ok_or_else(|| VfsError::ConnectionFailed(format!("no address for {addr}")))?;
        tokio::time::timeout(CONNECT_TIMEOUT, client::connect(config, socket_addr, handler))
            .await
            .map_err(|_| VfsError::ConnectionFailed("connection timed out".to_string()))??
    };

    debug!("SSH handshake completed with {}", profile.address);

    let authenticated = match (password, profile.identity_file.as_deref()) {
        (Some(password), _) => handle
            .authenticate_password(user, password)
            .await
            .map_err(|e| VfsError::AuthenticationFailed(e.to_string()))?,
        (None, Some(key_path)) => {
            let key = russh::keys::load_secret_key(key_path, None).map_err(|e| {
                VfsError::AuthenticationFailed(format!("cannot load key {key_path}: {e}"))
            })?;
            let key = PrivateKeyWithHashAlg::new(Arc::new(key), None);
            handle
                .authenticate_publickey(user, key)
                .await
                .map_err(|e| VfsError::AuthenticationFailed(e.to_string()))?
        }
        // Nothing to try yet: report as an auth failure so the registry
        // prompts for a password and retries.
        (None, None) => {
            return Err(VfsError::AuthenticationFailed(format!(
                "no credentials configured for {}",
                profile.name
            )))
        }
    };
    if !authenticated.success() {
        return Err(VfsError::AuthenticationFailed(
            "rejected by server".to_string(),
        ));
    }

    info!("SSH authentication successful for {}@{}", user, profile.address);

    let channel = handle.channel_open_session().await?;
    channel.request_subsystem(true, "sftp").await?;
    let sftp = RusshSftpSession::new(channel.into_stream()).await?;

    Ok(SftpSession {
        handle,
        sftp,
        host: profile.name.clone(),
    })
}

#[async_trait]
impl RemoteSession for SftpSession {
    async fn probe(&mut self) -> Result<(), VfsError> {
        self.sftp
            .canonicalize(".")
            .await
            .map(|_| ())
            .map_err(|e| VfsError::ConnectionFailed(e.to_string()))
    }

    async fn list_dir(&mut self, path: &str) -> Result<Vec<ListingEntry>, VfsError> {
        debug!("SFTP list {}:{}", self.host, path);
        let read_dir = self.sftp.read_dir(path).await?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            entries.push(entry_from_attrs(name, &entry.metadata()));
        }
        Ok(entries)
    }

    async fn stat(&mut self, path: &str) -> Result<ListingEntry, VfsError> {
        let attrs = self.sftp.metadata(path).await?;
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        Ok(entry_from_attrs(name, &attrs))
    }

    async fn download(
        &mut self,
        remote: &str,
        local: &Path,
        control: Arc<TaskControl>,
    ) -> Result<u64, VfsError> {
        debug!("SFTP download {}:{} -> {}", self.host, remote, local.display());
        let mut src = self.sftp.open(remote).await?;
        let mut dst = tokio::fs::File::create(local).await?;
        let mut buf = vec![0u8; TRANSFER_CHUNK];
        let mut total = 0u64;
        loop {
            if control.is_cancelled() {
                drop(dst);
                let _ = tokio::fs::remove_file(local).await;
                return Err(VfsError::Cancelled);
            }
            let n = src.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            dst.write_all(&buf[..n]).await?;
            control.record(n as u64);
            total += n as u64;
        }
        dst.flush().await?;
        Ok(total)
    }

    async fn upload(
        &mut self,
        local: &Path,
        remote: &str,
        control: Arc<TaskControl>,
    ) -> Result<u64, VfsError> {
        debug!("SFTP upload {} -> {}:{}", local.display(), self.host, remote);
        let mut src = tokio::fs::File::open(local).await?;
        let mut dst = self
            .sftp
            .open_with_flags(
                remote,
                OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
            )
            .await?;
        let mut buf = vec![0u8; TRANSFER_CHUNK];
        let mut total = 0u64;
        loop {
            if control.is_cancelled() {
                drop(dst);
                // Best effort: the half-written remote file must not linger.
                let _ = self.sftp.remove_file(remote).await;
                return Err(VfsError::Cancelled);
            }
            let n = src.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            dst.write_all(&buf[..n]).await?;
            control.record(n as u64);
            total += n as u64;
        }
        dst.flush().await?;
        Ok(total)
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<(), VfsError> {
        debug!("SFTP rename {}:{} -> {}", self.host, from, to);
        self.sftp.rename(from, to).await.map_err(VfsError::from)
    }

    async fn remove_file(&mut self, path: &str) -> Result<(), VfsError> {
        self.sftp.remove_file(path).await.map_err(VfsError::from)
    }

    async fn remove_dir(&mut self, path: &str) -> Result<(), VfsError> {
        self.sftp.remove_dir(path).await.map_err(VfsError::from)
    }

    async fn create_dir(&mut self, path: &str) -> Result<(), VfsError> {
        self.sftp.create_dir(path).await.map_err(VfsError::from)
    }

    async fn close(&mut self) -> Result<(), VfsError> {
        let _ = self.sftp.close().await;
        self.handle
            .disconnect(Disconnect::ByApplication, "Session closed", "en")
            .await
            .map_err(VfsError::from)
    }
}

/// Map SFTP attributes to the normalized listing record. A symlink is both
/// enterable and downloadable until its target says otherwise, matching
/// the listing-parser contract.
fn entry_from_attrs(name: String, attrs: &FileAttributes) -> ListingEntry {
    let is_symlink = attrs.is_symlink();
    ListingEntry {
        name,
        size: attrs.size.unwrap_or(0),
        mtime: attrs.mtime.map(|t| t as i64).unwrap_or(0),
        is_dir: attrs.is_dir() || is_symlink,
        is_retrievable: attrs.is_regular() || is_symlink,
        is_symlink,
        permissions: attrs.permissions.map(symbolic_mode),
        owner: attrs
            .user
            .clone()
            .or_else(|| attrs.uid.map(|uid| uid.to_string())),
        group: attrs
            .group
            .clone()
            .or_else(|| attrs.gid.map(|gid| gid.to_string())),
    }
}

/// Render the permission bits as the nine-character `rwxr-xr-x` form the
/// listing grammars produce, so cached records look the same for both
/// backends.
fn symbolic_mode(mode: u32) -> String {
    let mut out = String::with_capacity(9);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

/// russh event handler. Host-key pinning is the host application's
/// concern; the session layer accepts the presented key, as the original
/// client did.
struct ClientHandler {
    host: String,
}

impl client::Handler for ClientHandler {
    type Error = VfsError;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!("Accepting host key for {}", self.host);
        Ok(true)
    }
}

/// Spawn a `ProxyCommand` and expose its stdio as the SSH transport.
/// `%h`/`%p` expand to the target address and port.
fn spawn_proxy(command: &str, host: &str, port: u16) -> Result<ProxyStream, VfsError> {
    let rendered = command
        .replace("%h", host)
        .replace("%p", &port.to_string());
    info!("Starting proxy command: {}", rendered);

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(&rendered)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdin = child.stdin.take().ok_or_else(|| {
        VfsError::ConnectionFailed("proxy command has no stdin".to_string())
    })?;
    let stdout = child.stdout.take().ok_or_else(|| {
        VfsError::ConnectionFailed("proxy command has no stdout".to_string())
    })?;

    Ok(ProxyStream {
        _child: child,
        stdin,
        stdout,
    })
}

/// Child-process stdio as a single duplex stream: reads come from the
/// proxy's stdout, writes go to its stdin. The child is killed when the
/// stream drops.
struct ProxyStream {
    _child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl AsyncRead for ProxyStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

impl AsyncWrite for ProxyStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stdin).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbolic_mode() {
        assert_eq!(symbolic_mode(0o644), "rw-r--r--");
        assert_eq!(symbolic_mode(0o755), "rwxr-xr-x");
        assert_eq!(symbolic_mode(0o000), "---------");
        // Only the lowest nine bits matter.
        assert_eq!(symbolic_mode(0o100644), "rw-r--r--");
    }

    #[test]
    fn test_entry_from_attrs_symlink_is_both() {
        let mut attrs = FileAttributes {
            size: Some(11),
            uid: Some(1000),
            user: None,
            gid: Some(100),
            group: Some("users".to_string()),
            permissions: None,
            atime: None,
            mtime: Some(824255902),
        };
        attrs.set_symlink(true);
        let entry = entry_from_attrs("current".to_string(), &attrs);
        assert!(entry.is_symlink);
        assert!(entry.is_dir);
        assert!(entry.is_retrievable);
        assert_eq!(entry.owner.as_deref(), Some("1000"));
        assert_eq!(entry.group.as_deref(), Some("users"));
        assert_eq!(entry.mtime, 824255902);
    }
}
