use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::{ExecError, Result};
use crate::registry::Permission;

/// Reference chunk size: the tail buffer is sealed to disk once it holds 1 MiB.
pub const DEFAULT_CHUNK_THRESHOLD: usize = 1024 * 1024;

/// Storage and streaming settings for job output.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory holding sealed chunk files (`<job_id>_<index>.log`)
    pub dir: PathBuf,
    /// Tail buffer size that triggers sealing a chunk
    pub chunk_threshold: usize,
    /// Size of each read from a process pipe or chunk file
    pub read_block_size: usize,
    /// Live blocks a reader may fall behind before it is dropped
    pub subscriber_capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("job-logs"),
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            read_block_size: 1024,
            subscriber_capacity: 256,
        }
    }
}

/// TLS configuration for the client-facing API.
///
/// When enabled, all gRPC communication uses mutual TLS (mTLS):
/// - The server presents its certificate and verifies client certificates
/// - Clients present a certificate whose common name is their identity
/// - Both sides must have certificates signed by the same CA
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Enable TLS. If false, all other TLS settings are ignored.
    pub enabled: bool,

    /// Path to the CA certificate (PEM format).
    pub ca_cert_path: Option<PathBuf>,

    /// Path to this side's certificate (PEM format).
    pub cert_path: Option<PathBuf>,

    /// Path to this side's private key (PEM format).
    pub key_path: Option<PathBuf>,

    /// Allow plaintext for development when TLS files are missing.
    pub allow_insecure: bool,
}

impl TlsConfig {
    /// Check if TLS is properly configured with all required files.
    pub fn is_complete(&self) -> bool {
        self.enabled
            && self.ca_cert_path.is_some()
            && self.cert_path.is_some()
            && self.key_path.is_some()
    }
}

/// One row of the user directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub identity: String,
    pub permission: Permission,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub log: LogConfig,
    pub tls: TlsConfig,
    pub users: Vec<UserEntry>,
    /// Identity assumed for callers without a client certificate.
    /// Only meant for plaintext development setups.
    pub insecure_identity: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8087)),
            log: LogConfig::default(),
            tls: TlsConfig::default(),
            users: Vec::new(),
            insecure_identity: None,
        }
    }
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_user(mut self, identity: &str, permission: Permission) -> Self {
        self.users.push(UserEntry {
            identity: identity.to_string(),
            permission,
        });
        self
    }
}

/// Parse a user list of the form `"alice@example.com:write,bob@example.com:read"`.
pub fn parse_users(users: &str) -> Result<Vec<UserEntry>> {
    users
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (identity, permission) = entry.rsplit_once(':').ok_or_else(|| {
                ExecError::InvalidArgument(format!(
                    "invalid user entry {entry:?}, expected identity:permission"
                ))
            })?;
            if identity.is_empty() {
                return Err(ExecError::InvalidArgument(format!(
                    "empty identity in user entry {entry:?}"
                )));
            }
            Ok(UserEntry {
                identity: identity.to_string(),
                permission: permission.parse()?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_config_default() {
        let cfg = LogConfig::default();
        assert_eq!(cfg.dir, PathBuf::from("job-logs"));
        assert_eq!(cfg.chunk_threshold, 1024 * 1024);
        assert_eq!(cfg.read_block_size, 1024);
        assert_eq!(cfg.subscriber_capacity, 256);
    }

    #[test]
    fn tls_config_default() {
        let cfg = TlsConfig::default();
        assert!(!cfg.enabled);
        assert!(cfg.ca_cert_path.is_none());
        assert!(cfg.cert_path.is_none());
        assert!(cfg.key_path.is_none());
        assert!(!cfg.allow_insecure);
    }

    #[test]
    fn tls_config_is_complete_only_with_every_path() {
        let base = TlsConfig {
            enabled: true,
            ca_cert_path: Some(PathBuf::from("/ca.pem")),
            cert_path: Some(PathBuf::from("/cert.pem")),
            key_path: Some(PathBuf::from("/key.pem")),
            allow_insecure: false,
        };
        assert!(base.is_complete());

        let mut cfg = base.clone();
        cfg.enabled = false;
        assert!(!cfg.is_complete());

        let mut cfg = base.clone();
        cfg.ca_cert_path = None;
        assert!(!cfg.is_complete());

        let mut cfg = base.clone();
        cfg.cert_path = None;
        assert!(!cfg.is_complete());

        let mut cfg = base;
        cfg.key_path = None;
        assert!(!cfg.is_complete());
    }

    #[test]
    fn server_config_default() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:8087");
        assert!(cfg.users.is_empty());
        assert!(cfg.insecure_identity.is_none());
    }

    #[test]
    fn server_config_with_user() {
        let cfg = ServerConfig::new("0.0.0.0:9000".parse().unwrap())
            .with_user("alice@example.com", Permission::Write)
            .with_user("bob@example.com", Permission::Read);
        assert_eq!(cfg.listen_addr.port(), 9000);
        assert_eq!(cfg.users.len(), 2);
        assert_eq!(cfg.users[1].permission, Permission::Read);
    }

    #[test]
    fn parse_users_accepts_list() {
        let users = parse_users("alice@example.com:write, bob@example.com:read").unwrap();
        assert_eq!(
            users,
            vec![
                UserEntry {
                    identity: "alice@example.com".to_string(),
                    permission: Permission::Write,
                },
                UserEntry {
                    identity: "bob@example.com".to_string(),
                    permission: Permission::Read,
                },
            ]
        );
    }

    #[test]
    fn parse_users_empty_string() {
        assert!(parse_users("").unwrap().is_empty());
    }

    #[test]
    fn parse_users_rejects_bad_entries() {
        assert!(parse_users("alice@example.com").is_err());
        assert!(parse_users(":write").is_err());
        assert!(parse_users("alice@example.com:admin").is_err());
    }
}
