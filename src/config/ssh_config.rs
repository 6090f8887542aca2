//! SSH config lookup
//!
//! Parses `~/.ssh/config` so SFTP hosts can be addressed by the same
//! aliases the user's `ssh` already knows. Only the directives relevant to
//! opening a file-transfer session are kept: `Host`, `HostName`, `User`,
//! `Port`, `IdentityFile` and `ProxyCommand`. Wildcard patterns are
//! skipped — a host must be addressable by exact name to show up in the
//! backend root.

use std::path::PathBuf;

use tokio::fs;
use tracing::debug;

use super::{HostLookup, HostProfile};
use crate::error::VfsError;

/// One parsed `Host` block.
#[derive(Debug, Clone, Default)]
struct HostEntry {
    alias: String,
    hostname: Option<String>,
    user: Option<String>,
    port: Option<u16>,
    identity_file: Option<String>,
    proxy_command: Option<String>,
}

impl HostEntry {
    fn is_wildcard(&self) -> bool {
        self.alias.contains('*') || self.alias.contains('?')
    }

    fn profile(&self) -> HostProfile {
        HostProfile {
            name: self.alias.clone(),
            address: self
                .hostname
                .clone()
                .unwrap_or_else(|| self.alias.clone()),
            port: self.port.unwrap_or(22),
            user: self.user.clone(),
            identity_file: self.identity_file.clone(),
            proxy_command: self.proxy_command.clone(),
        }
    }
}

/// Parsed SSH client configuration; entries keep file order.
#[derive(Debug, Default)]
pub struct SshConfig {
    entries: Vec<HostEntry>,
}

impl SshConfig {
    /// Default location: `~/.ssh/config`.
    pub fn default_path() -> Result<PathBuf, VfsError> {
        dirs::home_dir()
            .map(|home| home.join(".ssh").join("config"))
            .ok_or_else(|| {
                VfsError::ConnectionFailed("cannot determine home directory".to_string())
            })
    }

    /// Load and parse a config file. A missing file yields an empty config;
    /// any other IO failure propagates.
    pub async fn load(path: Option<PathBuf>) -> Result<Self, VfsError> {
        let path = match path {
            Some(p) => p,
            None => Self::default_path()?,
        };

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No SSH config at {}", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(VfsError::Io(e)),
        };

        Ok(Self::parse(&content))
    }

    /// Parse SSH config text. Malformed lines are skipped, matching the
    /// lenient behavior of `ssh` itself.
    pub fn parse(content: &str) -> Self {
        let mut entries = Vec::new();
        let mut current: Option<HostEntry> = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            // Directives come as "Key Value" or "Key=Value".
            let (key, value) = match line.split_once('=') {
                Some((key, value)) => (key.trim(), value.trim()),
                None => match line.split_once(char::is_whitespace) {
                    Some((key, value)) => (key, value.trim()),
                    None => continue,
                },
            };

            if key.eq_ignore_ascii_case("host") {
                if let Some(entry) = current.take() {
                    entries.push(entry);
                }
                // "Host a b *" declares several patterns at once; keep the
                // first exact (non-wildcard) one.
                current = value
                    .split_whitespace()
                    .find(|alias| !alias.contains('*') && !alias.contains('?'))
                    .map(|alias| HostEntry {
                        alias: alias.to_string(),
                        ..Default::default()
                    });
                continue;
            }

            let Some(entry) = current.as_mut() else {
                continue;
            };
            if key.eq_ignore_ascii_case("hostname") {
                entry.hostname = Some(value.to_string());
            } else if key.eq_ignore_ascii_case("user") {
                entry.user = Some(value.to_string());
            } else if key.eq_ignore_ascii_case("port") {
                entry.port = value.parse().ok();
            } else if key.eq_ignore_ascii_case("identityfile") {
                entry.identity_file = Some(expand_tilde(value));
            } else if key.eq_ignore_ascii_case("proxycommand") {
                if !value.eq_ignore_ascii_case("none") {
                    entry.proxy_command = Some(value.to_string());
                }
            }
        }

        if let Some(entry) = current.take() {
            entries.push(entry);
        }

        entries.retain(|entry| !entry.is_wildcard());
        Self { entries }
    }
}

impl HostLookup for SshConfig {
    fn lookup(&self, host_name: &str) -> Option<HostProfile> {
        self.entries
            .iter()
            .find(|entry| entry.alias == host_name)
            .map(HostEntry::profile)
    }

    fn known_hosts(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.alias.clone()).collect()
    }
}

/// Expand a leading `~` to the home directory so key paths from the config
/// work with the key loader.
fn expand_tilde(path: &str) -> String {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped).to_string_lossy().into_owned();
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home.to_string_lossy().into_owned();
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let config = SshConfig::parse(
            r#"
# Comment
Host myserver
    HostName example.com
    User admin
    Port 2222
    IdentityFile ~/.ssh/id_rsa

Host otherserver
    HostName other.com
"#,
        );

        let hosts = config.known_hosts();
        assert_eq!(hosts, vec!["myserver", "otherserver"]);

        let profile = config.lookup("myserver").unwrap();
        assert_eq!(profile.address, "example.com");
        assert_eq!(profile.user.as_deref(), Some("admin"));
        assert_eq!(profile.port, 2222);
        assert!(profile.identity_file.unwrap().ends_with(".ssh/id_rsa"));

        let other = config.lookup("otherserver").unwrap();
        assert_eq!(other.port, 22);
        assert_eq!(other.user, None);
    }

    #[test]
    fn test_alias_is_address_without_hostname() {
        let config = SshConfig::parse("Host bare\n    User me\n");
        let profile = config.lookup("bare").unwrap();
        assert_eq!(profile.address, "bare");
    }

    #[test]
    fn test_wildcards_are_skipped() {
        let config = SshConfig::parse(
            r#"
Host *
    ServerAliveInterval 60

Host dev-*
    User developer

Host prod
    HostName prod.example.com
"#,
        );
        assert_eq!(config.known_hosts(), vec!["prod"]);
        assert!(config.lookup("dev-*").is_none());
    }

    #[test]
    fn test_proxy_command() {
        let config = SshConfig::parse(
            r#"
Host inner
    HostName inner.example.com
    ProxyCommand ssh -W %h:%p bastion

Host plain
    HostName plain.example.com
    ProxyCommand none
"#,
        );
        assert_eq!(
            config.lookup("inner").unwrap().proxy_command.as_deref(),
            Some("ssh -W %h:%p bastion")
        );
        assert_eq!(config.lookup("plain").unwrap().proxy_command, None);
    }

    #[test]
    fn test_key_equals_value_form() {
        let config = SshConfig::parse("Host h\n    HostName=eq.example.com\n");
        assert_eq!(config.lookup("h").unwrap().address, "eq.example.com");
    }

    #[test]
    fn test_unknown_host_is_none() {
        let config = SshConfig::parse("Host known\n");
        assert!(config.lookup("unknown").is_none());
    }
}
