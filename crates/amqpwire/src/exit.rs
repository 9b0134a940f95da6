use std::fmt;
use std::io;

use amqpwire_frame::FrameError;
use amqpwire_transport::{ConnectAttempt, TransportError};

pub const SUCCESS: i32 = 0;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::TimedOut => TIMEOUT,
        io::ErrorKind::InvalidInput => USAGE,
        _ => TRANSPORT_ERROR,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Io(source) => io_error(context, source),
        TransportError::ConnectFailure { ref attempts, .. } if all_timed_out(attempts) => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

/// Every attempt that reached a socket timed out. Families with no address
/// for the host are ignored.
fn all_timed_out(attempts: &[ConnectAttempt]) -> bool {
    let mut tried = attempts.iter().filter(|a| a.addr.is_some()).peekable();
    tried.peek().is_some() && tried.all(|a| a.error.kind() == io::ErrorKind::TimedOut)
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::Transport(err) => transport_error(context, err),
        FrameError::Malformed(_) | FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::Shutdown => CliError::new(INTERNAL, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use amqpwire_transport::AddressFamily;

    use super::*;

    fn attempt(kind: io::ErrorKind) -> ConnectAttempt {
        ConnectAttempt {
            addr: Some("192.0.2.1:5672".parse().unwrap()),
            family: AddressFamily::Ipv4,
            error: io::Error::new(kind, "attempt failed"),
        }
    }

    #[test]
    fn all_timed_out_attempts_map_to_timeout() {
        let err = TransportError::ConnectFailure {
            host: "broker".into(),
            port: 5672,
            attempts: vec![
                ConnectAttempt {
                    addr: None,
                    family: AddressFamily::Ipv6,
                    error: io::Error::new(io::ErrorKind::AddrNotAvailable, "no ipv6 address"),
                },
                attempt(io::ErrorKind::TimedOut),
            ],
        };
        assert_eq!(transport_error("connect", err).code, TIMEOUT);

        let mixed = TransportError::ConnectFailure {
            host: "broker".into(),
            port: 5672,
            attempts: vec![
                attempt(io::ErrorKind::TimedOut),
                attempt(io::ErrorKind::ConnectionRefused),
            ],
        };
        assert_eq!(transport_error("connect", mixed).code, TRANSPORT_ERROR);
    }

    #[test]
    fn frame_errors_map_to_exit_codes() {
        assert_eq!(
            frame_error("read", FrameError::Malformed("bad end".into())).code,
            DATA_INVALID
        );
        assert_eq!(
            frame_error("read", FrameError::ConnectionReset).code,
            TRANSPORT_ERROR
        );
        let timed_out = io::Error::new(io::ErrorKind::TimedOut, "read timed out");
        assert_eq!(frame_error("read", FrameError::Io(timed_out)).code, TIMEOUT);
    }
}
