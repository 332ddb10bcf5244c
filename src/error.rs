use std::io;

use thiserror::Error;

/// Failures on the physical link. None of these reach the caller of
/// `ConnectionManager::open` or `enqueue_send`; the control loop recovers from
/// them and reports them as `disconnected` events.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Port unavailable, permission denied or nonexistent.
    #[error("open {port}: {message}")]
    Open { port: String, message: String },
    /// Mid-session read/write failure, usually an unplugged device.
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
    /// Anything else. The loop keeps running after these.
    #[error("unexpected: {0}")]
    Unexpected(String),
}

impl LinkError {
    pub fn open(port: impl Into<String>, message: impl ToString) -> Self {
        LinkError::Open {
            port: port.into(),
            message: message.to_string(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            LinkError::Open { .. } => FailureKind::Open,
            LinkError::Io(_) => FailureKind::Io,
            LinkError::Unexpected(_) => FailureKind::Unexpected,
        }
    }
}

impl From<serialport::Error> for LinkError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::Io(kind) => LinkError::Io(io::Error::new(kind, e.description)),
            serialport::ErrorKind::NoDevice => {
                LinkError::Io(io::Error::new(io::ErrorKind::NotFound, e.description))
            }
            _ => LinkError::Unexpected(e.description),
        }
    }
}

/// Coarse classification carried on `disconnected` notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Open,
    Io,
    Unexpected,
}

/// Errors returned to the owner of a `ConnectionManager`.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("connection already opened")]
    AlreadyOpen,
    #[error("spawning control loop: {0}")]
    Spawn(#[source] io::Error),
}
