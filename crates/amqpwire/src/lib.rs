//! AMQP 0-9-1 wire client.
//!
//! amqpwire covers the bottom of a broker client: getting bytes to and from
//! the broker, cutting them into frames, and multiplexing channels over one
//! connection with a well-defined shutdown story.
//!
//! # Crate Structure
//!
//! - [`transport`]: Endpoint resolution, IPv6/IPv4 fallback, TLS upgrade hook
//! - [`frame`]: Frame codec and the single-writer frame transport
//! - [`session`]: Channel sessions, shutdown broadcast, reference connection

/// Re-export transport types.
pub mod transport {
    pub use amqpwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use amqpwire_frame::*;
}

/// Re-export session types.
pub mod session {
    pub use amqpwire_session::*;
}
