//! Channel numbering.
//!
//! Channel 0 carries connection-level control traffic and heartbeats.
//! Channels 1-65535 are logical sessions opened by the connection.

/// Connection-global control channel.
pub const CONNECTION_CHANNEL: u16 = 0;

/// First channel number available to sessions.
pub const FIRST_SESSION_CHANNEL: u16 = 1;

/// Highest channel number the wire format can address.
pub const MAX_CHANNEL: u16 = u16::MAX;

/// Returns a human-readable name for a channel number.
pub fn channel_name(id: u16) -> &'static str {
    match id {
        CONNECTION_CHANNEL => "CONNECTION",
        _ => "SESSION",
    }
}

/// Returns true for the connection-global control channel.
pub fn is_connection_channel(id: u16) -> bool {
    id == CONNECTION_CHANNEL
}
