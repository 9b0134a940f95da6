//! Channel sessions multiplexed over one broker connection.
//!
//! A [`Session`] reassembles inbound frames into [`Command`]s, hands them to
//! a [`CommandHandler`] and sends commands back through its
//! [`SessionHost`]. Every session records one [`ShutdownReason`] and
//! delivers it to its listeners exactly once, whether the close comes from
//! application code, the broker or a failed connection.
//!
//! [`Connection`] is the reference host: it owns the frame transport and
//! the session table and runs the single reader loop.

pub mod command;
pub mod connection;
pub mod error;
pub mod kind;
pub mod reason;
pub mod session;
pub mod signal;

pub use command::{content_body_size, Command, MethodId};
pub use connection::{ClosedSendPolicy, Connection, ConnectionConfig};
pub use error::{Result, SessionError};
pub use kind::{
    ChannelKind, ContentAssembler, ContentClassifier, ControlAssembler, FrameAssembler,
    MethodAssembler, MethodIdClassifier,
};
pub use reason::{
    Initiator, ShutdownReason, CONNECTION_FORCED, FRAME_ERROR, INTERNAL_ERROR, REPLY_SUCCESS,
    UNEXPECTED_FRAME,
};
pub use session::{CommandHandler, Session, SessionHost, SessionState};
pub use signal::{ListenerId, ShutdownSignal};
