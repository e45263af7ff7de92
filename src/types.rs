// Shared value types for sessions and remote metadata. Kept simple and
// serializable so snapshots can be handed straight to a UI layer.
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Host-key validation policy against known_hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KnownHostsPolicy {
    /// Require an exact known_hosts match.
    #[default]
    Strict,
    /// TOFU: accept and store new hosts; reject changed keys.
    AcceptNew,
    /// No verification.
    Off,
}

/// Confirmation hook for unknown host keys: (host, port, algorithm,
/// fingerprint) -> accept. Enforcement lives in the embedding application;
/// the engine only carries the hook alongside the credentials.
pub type HostKeyConfirm = dyn Fn(&str, u16, &str, &str) -> bool + Send + Sync;

/// Keyboard-interactive hook: (name, instruction, prompts) -> responses,
/// one per prompt, or `None` when the user gave up.
pub type KbdInteractive = dyn Fn(&str, &str, &[String]) -> Option<Vec<String>> + Send + Sync;

/// Credentials and policy bundle for one remote endpoint. Freely copyable;
/// every worker session is derived from the same options.
#[derive(Clone)]
pub struct SessionOptions {
    pub host: String,
    pub port: u16,
    pub username: String,

    pub password: Option<String>,
    pub private_key_path: Option<PathBuf>,
    pub private_key_passphrase: Option<String>,

    pub known_hosts_path: Option<PathBuf>,
    pub known_hosts_policy: KnownHostsPolicy,

    pub hostkey_confirm: Option<Arc<HostKeyConfirm>>,
    pub keyboard_interactive: Option<Arc<KbdInteractive>>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            username: String::new(),
            password: None,
            private_key_path: None,
            private_key_passphrase: None,
            known_hosts_path: None,
            known_hosts_policy: KnownHostsPolicy::Strict,
            hostkey_confirm: None,
            keyboard_interactive: None,
        }
    }
}

impl SessionOptions {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self { host: host.into(), username: username.into(), ..Self::default() }
    }

    /// `host` and `username` are mandatory for every backend.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.host.trim().is_empty() || self.username.trim().is_empty() {
            return Err(ClientError::InvalidArgument(
                "host and username are required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn effective_port(&self) -> u16 {
        if self.port == 0 { 22 } else { self.port }
    }
}

impl std::fmt::Debug for SessionOptions {
    // Secrets are deliberately left out of the debug form.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("host", &self.host)
            .field("port", &self.effective_port())
            .field("username", &self.username)
            .field("has_password", &self.password.is_some())
            .field("private_key_path", &self.private_key_path)
            .field("known_hosts_policy", &self.known_hosts_policy)
            .finish()
    }
}

/// POSIX symlink type bits within `FileInfo::mode`.
pub const S_IFLNK: u32 = 0o120000;

/// One remote directory entry as reported by a client. `has_size`
/// distinguishes an actual zero from "server did not say".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub has_size: bool,
    /// Epoch seconds; 0 = unknown.
    pub mtime: u64,
    /// POSIX bits including the type nibble.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

impl FileInfo {
    pub fn is_symlink(&self) -> bool {
        (self.mode & S_IFLNK) == S_IFLNK
    }
}

/// One file produced by a recursive remote walk, ready to be turned into a
/// download task. `rel_path` is sanitized and always uses forward slashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumeratedFile {
    pub remote_path: String,
    pub rel_path: String,
    pub size: u64,
    pub has_size: bool,
}
