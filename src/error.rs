use std::io::ErrorKind;
use std::sync::Arc;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),
    #[error("Failed to connect to {addr}: {source}")]
    ConnectError {
        addr: String,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Not connected")]
    NotConnected,
    #[error("Operation timed out")]
    OperationTimeout,
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Unknown device type code {0}")]
    UnknownDeviceType(u16),
    #[error("Connection manager destroyed")]
    ManagerDestroyed,
    #[error("IO error: {0}")]
    Io(#[source] Arc<std::io::Error>),
}

impl Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// True for failures that mean the transport itself is gone, as opposed to
    /// a single request going wrong on a healthy connection.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            Error::ConnectionClosed | Error::ConnectError { .. } => true,
            Error::Io(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::ConnectionRefused
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
                    | ErrorKind::NotConnected
            ),
            _ => false,
        }
    }

    /// Report whatever a connector failed with as a failure to reach `addr`.
    pub(crate) fn into_connect_error(self, addr: String) -> Error {
        match self {
            Error::ConnectError { .. } | Error::ConnectTimeout(_) => self,
            Error::Io(source) => Error::ConnectError { addr, source },
            other => Error::ConnectError {
                addr,
                source: Arc::new(std::io::Error::other(other.to_string())),
            },
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            Error::OperationTimeout | Error::ConnectTimeout(_) => true,
            Error::Io(e) => e.kind() == ErrorKind::TimedOut,
            _ => false,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        match err.kind() {
            ErrorKind::InvalidData => Error::Protocol(err.to_string()),
            _ => Error::Io(Arc::new(err)),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
