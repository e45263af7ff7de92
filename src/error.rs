/// Structured errors surfaced by client implementations.
///
/// Messages are plain strings forwarded verbatim to the UI; no formatting or
/// localization happens at this layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Malformed input: empty host/username, path containing `..`, etc.
    InvalidArgument(String),
    /// Operation issued while the client is not connected.
    NotConnected,
    /// Target path does not exist (distinguished from transport faults).
    NotFound(String),
    /// The server refused the operation.
    PermissionDenied(String),
    /// Connection-level failure: resolve, handshake, drop, timeout.
    Transport(String),
    /// Local filesystem failure during a transfer.
    Io(String),
    /// The cancel predicate fired; not a fault.
    Canceled,
    /// Operation not implemented by this client (mock).
    Unsupported(&'static str),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ClientError::*;
        match self {
            InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            NotConnected => write!(f, "not connected"),
            NotFound(path) => write!(f, "not found: {}", path),
            PermissionDenied(path) => write!(f, "permission denied: {}", path),
            Transport(msg) => write!(f, "transport error: {}", msg),
            Io(msg) => write!(f, "i/o error: {}", msg),
            Canceled => write!(f, "canceled"),
            Unsupported(op) => write!(f, "operation not supported by this client: {}", op),
        }
    }
}

impl std::error::Error for ClientError {}

impl ClientError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, ClientError::Canceled)
    }

    /// Whether the error denotes absence rather than a fault. Enumeration
    /// and precheck paths treat these as skippable.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

/// Errors raised by the engine itself (scheduling, worker session factory),
/// as opposed to faults reported by a client.
#[derive(Debug, Clone)]
pub enum EngineError {
    /// No client has been injected into the manager/model.
    NoClient,
    /// Session options were never provided; worker sessions cannot be built.
    NoSessionOptions,
    /// The connection factory failed after exhausting its attempts.
    ConnectionFactory(String),
    /// A background listing could not be started.
    ListingFailed(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use EngineError::*;
        match self {
            NoClient => write!(f, "no SFTP client available"),
            NoSessionOptions => write!(f, "missing session options for worker connections"),
            ConnectionFactory(msg) => {
                write!(f, "could not create transfer connection: {}", msg)
            }
            ListingFailed(msg) => write!(f, "could not start remote listing: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}
