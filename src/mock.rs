// In-memory mock client: supports connect validation and listings over a
// predefined tree. Every mutating or transfer operation reports a
// deterministic unsupported error so tests can assert error wiring.
use std::collections::HashMap;
use std::path::Path;

use crate::client::{CancelFn, ProgressFn, SftpClient};
use crate::error::ClientError;
use crate::types::{FileInfo, SessionOptions};

pub struct MockClient {
    connected: bool,
    fs: HashMap<String, Vec<FileInfo>>,
}

fn dir_entry(name: &str) -> FileInfo {
    FileInfo {
        name: name.to_string(),
        is_dir: true,
        mode: 0o040755,
        ..FileInfo::default()
    }
}

fn file_entry(name: &str, size: u64) -> FileInfo {
    FileInfo {
        name: name.to_string(),
        is_dir: false,
        size,
        has_size: true,
        mode: 0o100644,
        ..FileInfo::default()
    }
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClient {
    pub fn new() -> Self {
        let mut fs = HashMap::new();
        fs.insert(
            "/".to_string(),
            vec![dir_entry("home"), dir_entry("var"), file_entry("readme.txt", 1280)],
        );
        fs.insert(
            "/home".to_string(),
            vec![dir_entry("luis"), dir_entry("guest"), file_entry("notes.md", 2048)],
        );
        fs.insert(
            "/home/luis".to_string(),
            vec![dir_entry("proyectos"), file_entry("foto.jpg", 34567)],
        );
        fs.insert("/var".to_string(), vec![dir_entry("log")]);
        Self { connected: false, fs }
    }
}

impl SftpClient for MockClient {
    fn connect(&mut self, opts: &SessionOptions) -> Result<(), ClientError> {
        opts.validate()?;
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn list(&mut self, remote_path: &str) -> Result<Vec<FileInfo>, ClientError> {
        if !self.connected {
            return Err(ClientError::NotConnected);
        }
        let path = if remote_path.is_empty() { "/" } else { remote_path };
        match self.fs.get(path) {
            // Deliberately unsorted; ordering belongs to the model.
            Some(entries) => Ok(entries.clone()),
            None => Err(ClientError::NotFound(format!("mock remote path: {}", path))),
        }
    }

    fn get(
        &mut self,
        _remote: &str,
        _local: &Path,
        _progress: Option<&mut ProgressFn>,
        _should_cancel: Option<&CancelFn>,
        _resume: bool,
    ) -> Result<(), ClientError> {
        Err(ClientError::Unsupported("get"))
    }

    fn put(
        &mut self,
        _local: &Path,
        _remote: &str,
        _progress: Option<&mut ProgressFn>,
        _should_cancel: Option<&CancelFn>,
        _resume: bool,
    ) -> Result<(), ClientError> {
        Err(ClientError::Unsupported("put"))
    }

    fn exists(&mut self, _remote_path: &str) -> Result<(bool, bool), ClientError> {
        Err(ClientError::Unsupported("exists"))
    }

    fn stat(&mut self, _remote_path: &str) -> Result<FileInfo, ClientError> {
        Err(ClientError::Unsupported("stat"))
    }

    fn chmod(&mut self, _remote_path: &str, _mode: u32) -> Result<(), ClientError> {
        Err(ClientError::Unsupported("chmod"))
    }

    fn chown(&mut self, _remote_path: &str, _uid: u32, _gid: u32) -> Result<(), ClientError> {
        Err(ClientError::Unsupported("chown"))
    }

    fn set_times(
        &mut self,
        _remote_path: &str,
        _atime: u64,
        _mtime: u64,
    ) -> Result<(), ClientError> {
        Ok(())
    }

    fn mkdir(&mut self, _remote_dir: &str, _mode: u32) -> Result<(), ClientError> {
        Err(ClientError::Unsupported("mkdir"))
    }

    fn remove_file(&mut self, _remote_path: &str) -> Result<(), ClientError> {
        Err(ClientError::Unsupported("remove_file"))
    }

    fn remove_dir(&mut self, _remote_dir: &str) -> Result<(), ClientError> {
        Err(ClientError::Unsupported("remove_dir"))
    }

    fn rename(&mut self, _from: &str, _to: &str, _overwrite: bool) -> Result<(), ClientError> {
        Err(ClientError::Unsupported("rename"))
    }

    fn new_connection_like(
        &self,
        opts: &SessionOptions,
    ) -> Result<Box<dyn SftpClient + Send>, ClientError> {
        let mut fresh = MockClient::new();
        fresh.connect(opts)?;
        Ok(Box::new(fresh))
    }
}
