//! TCP transport for the amqpwire broker client.
//!
//! Turns an [`Endpoint`] into a live byte stream:
//! - resolves the host and tries IPv6 then IPv4 (or the order the endpoint asks for)
//! - bounds every connect attempt by a timeout
//! - applies an optional security upgrade before any protocol byte is sent
//!
//! This is the lowest layer of amqpwire. Framing builds on the [`AmqpStream`]
//! type provided here.

pub mod connector;
pub mod endpoint;
pub mod error;
pub mod stream;
pub mod upgrade;

pub use connector::{connect, connect_with_config, Connector};
pub use endpoint::{
    Endpoint, FamilyPreference, ProtocolVersion, TlsSettings, TransportConfig,
    DEFAULT_MAX_PAYLOAD, DEFAULT_PORT, DEFAULT_TLS_PORT,
};
pub use error::{AddressFamily, ConnectAttempt, Result, TransportError};
pub use stream::{AmqpStream, AsyncStream};
pub use upgrade::StreamUpgrade;

#[cfg(feature = "tls")]
pub use upgrade::RustlsUpgrade;
