// portside: transfer engine core for a cross-platform SFTP client.
// Client contract + mock, remote directory model with safe recursive
// enumeration, and a concurrent transfer manager with throttling and
// cooperative pause/cancel.
pub mod client;
pub mod error;
pub mod manager;
pub mod mock;
pub mod remote;
pub mod settings;
pub mod ssh2_client;
pub mod types;
pub mod util;

pub use client::{SftpClient, SharedClient};
pub use error::{ClientError, EngineError};
pub use manager::{TransferManager, TransferTask};
pub use types::{FileInfo, SessionOptions};
