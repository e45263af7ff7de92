// Abstract SFTP operation set. Concrete backends (ssh2, mock) implement
// this trait so the model and the transfer manager stay decoupled from the
// wire protocol.
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::ClientError;
use crate::types::{FileInfo, SessionOptions};

/// Progress callback for streaming transfers: (bytes done, bytes total).
/// Invoked at backend-defined boundaries; `done` is monotonic per transfer.
pub type ProgressFn = dyn FnMut(u64, u64) + Send;

/// Cooperative cancel predicate polled between I/O boundaries. When it
/// returns true the transfer stops with [`ClientError::Canceled`].
pub type CancelFn = dyn Fn() -> bool + Send + Sync;

/// A client shared between the directory model and the transfer manager.
/// Neither owns it; workers derive their own sessions through
/// [`SftpClient::new_connection_like`].
pub type SharedClient = Arc<Mutex<dyn SftpClient + Send>>;

pub trait SftpClient: Send {
    /// Connect using the given options. Fails with
    /// [`ClientError::InvalidArgument`] when `host` or `username` is empty.
    fn connect(&mut self, opts: &SessionOptions) -> Result<(), ClientError>;

    /// Idempotent. After it returns no further operation may be issued on
    /// this instance.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// List a remote directory. An empty path is treated as `/`. Entries
    /// come back unsorted; ordering is the caller's responsibility.
    fn list(&mut self, remote_path: &str) -> Result<Vec<FileInfo>, ClientError>;

    /// Download `remote` into `local`. With `resume`, an existing local
    /// file shorter than the remote continues from its current length;
    /// otherwise the local file is truncated.
    fn get(
        &mut self,
        remote: &str,
        local: &Path,
        progress: Option<&mut ProgressFn>,
        should_cancel: Option<&CancelFn>,
        resume: bool,
    ) -> Result<(), ClientError>;

    /// Upload `local` into `remote`; resume semantics mirror [`Self::get`].
    fn put(
        &mut self,
        local: &Path,
        remote: &str,
        progress: Option<&mut ProgressFn>,
        should_cancel: Option<&CancelFn>,
        resume: bool,
    ) -> Result<(), ClientError>;

    /// Existence probe. Absence is `Ok((false, _))`, never an error; only
    /// transport or permission faults return `Err`.
    fn exists(&mut self, remote_path: &str) -> Result<(bool, bool), ClientError>;

    fn stat(&mut self, remote_path: &str) -> Result<FileInfo, ClientError>;

    /// Best-effort; servers may refuse.
    fn chmod(&mut self, remote_path: &str, mode: u32) -> Result<(), ClientError>;

    /// Best-effort; servers may refuse.
    fn chown(&mut self, remote_path: &str, uid: u32, gid: u32) -> Result<(), ClientError>;

    /// Set remote atime/mtime (epoch seconds). Best-effort.
    fn set_times(&mut self, remote_path: &str, atime: u64, mtime: u64)
    -> Result<(), ClientError>;

    /// Create a single directory level; parents are not created.
    fn mkdir(&mut self, remote_dir: &str, mode: u32) -> Result<(), ClientError>;

    fn remove_file(&mut self, remote_path: &str) -> Result<(), ClientError>;

    fn remove_dir(&mut self, remote_dir: &str) -> Result<(), ClientError>;

    fn rename(&mut self, from: &str, to: &str, overwrite: bool) -> Result<(), ClientError>;

    /// Open a second, independent session from the same kind of backend and
    /// the given credentials. Returns a **connected** client. This is the
    /// sole entry point used by transfer workers and the async lister;
    /// callers serialize it (see the manager's connection-factory mutex).
    fn new_connection_like(
        &self,
        opts: &SessionOptions,
    ) -> Result<Box<dyn SftpClient + Send>, ClientError>;
}
