use amqpwire_transport::ProtocolVersion;

/// Protocol name that opens every protocol header.
pub const PROTOCOL_NAME: [u8; 4] = *b"AMQP";

/// Protocol header: name (4) + version bytes (4).
pub const PROTOCOL_HEADER_SIZE: usize = 8;

/// Encode the protocol header announcing `version`.
///
/// ```text
/// revision != 0:  "AMQP" 0x00 major minor revision
/// revision == 0:  "AMQP" 0x01 0x01 major minor      (legacy layout)
/// ```
pub fn encode_protocol_header(version: ProtocolVersion) -> [u8; PROTOCOL_HEADER_SIZE] {
    let [a, m, q, p] = PROTOCOL_NAME;
    if version.revision == 0 {
        [a, m, q, p, 1, 1, version.major, version.minor]
    } else {
        [a, m, q, p, 0, version.major, version.minor, version.revision]
    }
}

/// Decode a protocol header, e.g. the one a broker sends back when it
/// rejects the version we announced.
///
/// Returns `None` if `bytes` is not a protocol header.
pub fn decode_protocol_header(bytes: &[u8]) -> Option<ProtocolVersion> {
    if bytes.len() < PROTOCOL_HEADER_SIZE || bytes[..4] != PROTOCOL_NAME {
        return None;
    }

    match bytes[4..PROTOCOL_HEADER_SIZE] {
        [1, 1, major, minor] => Some(ProtocolVersion::new(major, minor, 0)),
        [0, major, minor, revision] => Some(ProtocolVersion::new(major, minor, revision)),
        _ => None,
    }
}
