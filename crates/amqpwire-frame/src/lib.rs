//! AMQP 0-9-1 frame codec and frame transport.
//!
//! Every frame on the wire is laid out as:
//! - a 1-byte frame type (method, header, body, heartbeat)
//! - a 2-byte big-endian channel number
//! - a 4-byte big-endian payload length
//! - the payload, followed by the `0xCE` end marker
//!
//! [`FrameTransport`] reads and writes whole frames over a connected
//! stream. Writes from any number of tasks are serialised so two frames
//! never interleave on the wire.

pub mod channel;
pub mod codec;
pub mod error;
pub mod header;
pub mod reader;
pub mod settings;
pub mod transport;
pub mod writer;

pub use channel::{CONNECTION_CHANNEL, FIRST_SESSION_CHANNEL, MAX_CHANNEL};
pub use codec::{
    decode_frame, encode_frame, AmqpCodec, Frame, FrameConfig, FrameType, FRAME_END,
    FRAME_OVERHEAD, HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use header::{decode_protocol_header, encode_protocol_header, PROTOCOL_HEADER_SIZE};
pub use reader::FrameReader;
pub use settings::FrameSettings;
pub use transport::FrameTransport;
pub use writer::FrameWriter;
