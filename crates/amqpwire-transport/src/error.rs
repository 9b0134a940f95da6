use std::fmt;
use std::net::SocketAddr;

/// Errors that can occur while establishing or tearing down a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Host name resolution failed.
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    /// Every eligible connect attempt failed.
    #[error("failed to connect to {host}:{port} ({} attempt(s)){}", attempts.len(), last_attempt(attempts))]
    ConnectFailure {
        host: String,
        port: u16,
        attempts: Vec<ConnectAttempt>,
    },

    /// The security upgrade of a freshly connected stream failed.
    #[error("security upgrade failed: {0}")]
    Upgrade(String),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

/// One failed connect attempt, kept for the aggregated [`TransportError::ConnectFailure`].
#[derive(Debug)]
pub struct ConnectAttempt {
    /// The address that was tried, if resolution produced one for this family.
    pub addr: Option<SocketAddr>,
    /// Address family of the attempt.
    pub family: AddressFamily,
    pub error: std::io::Error,
}

/// IP address family of a connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::Ipv4 => f.write_str("ipv4"),
            AddressFamily::Ipv6 => f.write_str("ipv6"),
        }
    }
}

impl fmt::Display for ConnectAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr {
            Some(addr) => write!(f, "{} {addr}: {}", self.family, self.error),
            None => write!(f, "{}: {}", self.family, self.error),
        }
    }
}

fn last_attempt(attempts: &[ConnectAttempt]) -> String {
    attempts
        .last()
        .map(|attempt| format!(": last error {attempt}"))
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, TransportError>;
