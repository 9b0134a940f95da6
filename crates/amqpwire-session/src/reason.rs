use std::error::Error;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// Normal shutdown.
pub const REPLY_SUCCESS: u16 = 200;
/// The connection was closed by the peer or forced down by an operator.
pub const CONNECTION_FORCED: u16 = 320;
/// The peer sent a frame that could not be decoded.
pub const FRAME_ERROR: u16 = 501;
/// A frame arrived that is not allowed in the current channel state.
pub const UNEXPECTED_FRAME: u16 = 505;
/// Local failure: reset stream, I/O error, handler failure.
pub const INTERNAL_ERROR: u16 = 541;

/// Who brought the channel or connection down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Initiator {
    /// Application code closed it.
    Local,
    /// The broker closed it.
    Peer,
    /// A protocol or I/O failure closed it.
    Error,
}

impl fmt::Display for Initiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Initiator::Local => "local",
            Initiator::Peer => "peer",
            Initiator::Error => "error",
        })
    }
}

/// Why a channel or connection ended.
///
/// Recorded once per channel and never changed afterwards.
#[derive(Clone)]
pub struct ShutdownReason {
    initiator: Initiator,
    reply_code: u16,
    reply_text: String,
    cause: Option<Arc<dyn Error + Send + Sync>>,
}

impl ShutdownReason {
    pub fn new(initiator: Initiator, reply_code: u16, reply_text: impl Into<String>) -> Self {
        Self {
            initiator,
            reply_code,
            reply_text: reply_text.into(),
            cause: None,
        }
    }

    pub fn local(reply_code: u16, reply_text: impl Into<String>) -> Self {
        Self::new(Initiator::Local, reply_code, reply_text)
    }

    pub fn peer(reply_code: u16, reply_text: impl Into<String>) -> Self {
        Self::new(Initiator::Peer, reply_code, reply_text)
    }

    pub fn error(reply_code: u16, reply_text: impl Into<String>) -> Self {
        Self::new(Initiator::Error, reply_code, reply_text)
    }

    /// Attach the error that triggered the shutdown.
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn initiator(&self) -> Initiator {
        self.initiator
    }

    pub fn reply_code(&self) -> u16 {
        self.reply_code
    }

    pub fn reply_text(&self) -> &str {
        &self.reply_text
    }

    pub fn cause(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// True for a local close with a success code.
    pub fn is_clean(&self) -> bool {
        self.initiator == Initiator::Local && self.reply_code == REPLY_SUCCESS
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} shutdown ({}): {}",
            self.initiator, self.reply_code, self.reply_text
        )?;
        if let Some(cause) = &self.cause {
            write!(f, "; caused by: {cause}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownReason")
            .field("initiator", &self.initiator)
            .field("reply_code", &self.reply_code)
            .field("reply_text", &self.reply_text)
            .field("cause", &self.cause.as_ref().map(|c| c.to_string()))
            .finish()
    }
}
