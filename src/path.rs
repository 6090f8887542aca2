//! Virtual path model
//!
//! A [`VirtualPath`] addresses one entry on one backend. For the remote
//! backends the host name is the first segment of the user-visible location
//! (`sftp://myhost/var/log`); the empty location is the backend root, which
//! lists the known hosts. Remote paths always use `/` and are always
//! absolute, regardless of the server's own OS.

use std::fmt;

use crate::error::VfsError;

/// Backend identity. Matched exhaustively wherever the facade routes an
/// operation; there is no string-prefix scheme sniffing anywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// The local filesystem, as the source or destination of a transfer.
    Local,
    /// SFTP over an SSH session.
    Sftp,
    /// Classic FTP.
    Ftp,
}

impl Backend {
    /// URL-style scheme tag, used for display and cache keys.
    pub fn scheme(&self) -> &'static str {
        match self {
            Backend::Local => "file",
            Backend::Sftp => "sftp",
            Backend::Ftp => "ftp",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// One addressable entry: `(backend, host, remote path)`.
///
/// Invariants: a remote path is absolute (`/` when only the host is
/// addressed); the backend root carries no host at all; local paths carry
/// no host and keep the platform path verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VirtualPath {
    backend: Backend,
    host: Option<String>,
    path: String,
}

impl VirtualPath {
    /// The backend root: the location that lists the known hosts.
    pub fn root(backend: Backend) -> Self {
        Self {
            backend,
            host: None,
            path: String::new(),
        }
    }

    /// A local filesystem path.
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            backend: Backend::Local,
            host: None,
            path: path.into(),
        }
    }

    /// A remote path on `host`. The path is normalized to be absolute.
    pub fn remote(
        backend: Backend,
        host: impl Into<String>,
        path: impl Into<String>,
    ) -> Result<Self, VfsError> {
        if backend == Backend::Local {
            return Err(VfsError::InvalidPath(
                "local paths carry no host".to_string(),
            ));
        }
        let host = host.into();
        if host.is_empty() || host.contains('/') {
            return Err(VfsError::InvalidPath(format!("bad host name: {host:?}")));
        }
        Ok(Self {
            backend,
            host: Some(host),
            path: normalize_remote(&path.into()),
        })
    }

    /// Split a user-visible location (`"myhost/var/log"`, `""`, …) into a
    /// virtual path. The first segment, if any, is the host; the remainder
    /// becomes the absolute remote path (`/` by default). Whether the host
    /// segment actually names a known host is the facade's check.
    pub fn parse(backend: Backend, location: &str) -> Result<Self, VfsError> {
        if backend == Backend::Local {
            return Ok(Self::local(location));
        }
        let location = location.trim_matches('/');
        if location.is_empty() {
            return Ok(Self::root(backend));
        }
        match location.split_once('/') {
            Some((host, rest)) => Self::remote(backend, host, format!("/{rest}")),
            None => Self::remote(backend, location, "/"),
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// The absolute remote path, or the local path for `Backend::Local`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The backend root (no host addressed).
    pub fn is_root(&self) -> bool {
        self.host.is_none() && self.path.is_empty()
    }

    /// A host with no path below it (`sftp://myhost/`).
    pub fn is_host_root(&self) -> bool {
        self.host.is_some() && self.path == "/"
    }

    /// Last path segment; the host name when only the host is addressed.
    pub fn name(&self) -> &str {
        match self.path.rsplit_once('/') {
            Some((_, name)) if !name.is_empty() => name,
            _ => match (&self.host, self.path.as_str()) {
                (Some(host), "/" | "") => host,
                _ => &self.path,
            },
        }
    }

    /// Parent location, or `None` at the backend root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        if self.backend == Backend::Local {
            let parent = std::path::Path::new(&self.path).parent()?;
            return Some(Self::local(parent.to_string_lossy().into_owned()));
        }
        if self.is_host_root() {
            return Some(Self::root(self.backend));
        }
        let parent = match self.path.rsplit_once('/') {
            Some(("", _)) => "/".to_string(),
            Some((rest, _)) => rest.to_string(),
            None => "/".to_string(),
        };
        Some(Self {
            backend: self.backend,
            host: self.host.clone(),
            path: parent,
        })
    }

    /// Append one child segment.
    pub fn join(&self, child: &str) -> Self {
        if self.backend == Backend::Local {
            let mut p = std::path::PathBuf::from(&self.path);
            p.push(child);
            return Self::local(p.to_string_lossy().into_owned());
        }
        Self {
            backend: self.backend,
            host: self.host.clone(),
            path: join_remote(&self.path, child),
        }
    }

    /// Stable key for the stat cache; same shape as [`fmt::Display`].
    pub fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Some(host) if self.path == "/" => write!(f, "{}://{}", self.backend, host),
            Some(host) => write!(f, "{}://{}{}", self.backend, host, self.path),
            None => write!(f, "{}://{}", self.backend, self.path),
        }
    }
}

/// Normalize a remote path to absolute form with no trailing slash.
fn normalize_remote(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Join remote path components using `/` regardless of either OS.
fn join_remote(base: &str, component: &str) -> String {
    if base.ends_with('/') {
        format!("{base}{component}")
    } else {
        format!("{base}/{component}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_locations() {
        let root = VirtualPath::parse(Backend::Sftp, "").unwrap();
        assert!(root.is_root());
        assert_eq!(root.host(), None);

        let host_only = VirtualPath::parse(Backend::Sftp, "myhost").unwrap();
        assert_eq!(host_only.host(), Some("myhost"));
        assert_eq!(host_only.path(), "/");
        assert!(host_only.is_host_root());

        let deep = VirtualPath::parse(Backend::Ftp, "myhost/var/log").unwrap();
        assert_eq!(deep.host(), Some("myhost"));
        assert_eq!(deep.path(), "/var/log");
    }

    #[test]
    fn test_remote_normalizes_path() {
        let p = VirtualPath::remote(Backend::Sftp, "h", "var/log/").unwrap();
        assert_eq!(p.path(), "/var/log");
        let p = VirtualPath::remote(Backend::Sftp, "h", "").unwrap();
        assert_eq!(p.path(), "/");
    }

    #[test]
    fn test_remote_rejects_bad_hosts() {
        assert!(VirtualPath::remote(Backend::Sftp, "", "/x").is_err());
        assert!(VirtualPath::remote(Backend::Sftp, "a/b", "/x").is_err());
        assert!(VirtualPath::remote(Backend::Local, "h", "/x").is_err());
    }

    #[test]
    fn test_join_and_parent() {
        let host = VirtualPath::parse(Backend::Sftp, "myhost").unwrap();
        let file = host.join("a").join("b.txt");
        assert_eq!(file.path(), "/a/b.txt");
        assert_eq!(file.name(), "b.txt");

        let parent = file.parent().unwrap();
        assert_eq!(parent.path(), "/a");
        assert_eq!(parent.parent().unwrap(), host);
        assert_eq!(host.parent().unwrap(), VirtualPath::root(Backend::Sftp));
        assert_eq!(VirtualPath::root(Backend::Sftp).parent(), None);
    }

    #[test]
    fn test_host_root_name_is_host() {
        let host = VirtualPath::parse(Backend::Ftp, "box").unwrap();
        assert_eq!(host.name(), "box");
    }

    #[test]
    fn test_display() {
        let p = VirtualPath::remote(Backend::Sftp, "myhost", "/a/b").unwrap();
        assert_eq!(p.to_string(), "sftp://myhost/a/b");
        let host = VirtualPath::remote(Backend::Sftp, "myhost", "/").unwrap();
        assert_eq!(host.to_string(), "sftp://myhost");
        assert_eq!(VirtualPath::root(Backend::Ftp).to_string(), "ftp://");
    }

    #[test]
    fn test_local_paths() {
        let p = VirtualPath::local("/tmp/data");
        assert_eq!(p.backend(), Backend::Local);
        assert_eq!(p.host(), None);
        assert_eq!(p.join("f.txt").path(), "/tmp/data/f.txt");
    }
}
