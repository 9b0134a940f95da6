use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default AMQP port for plain TCP.
pub const DEFAULT_PORT: u16 = 5672;

/// Default AMQP port when TLS is enabled.
pub const DEFAULT_TLS_PORT: u16 = 5671;

/// Default maximum payload size accepted from the wire: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Protocol version announced in the protocol header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    #[serde(default)]
    pub revision: u8,
}

impl ProtocolVersion {
    /// AMQP 0-9-1.
    pub const AMQP_0_9_1: ProtocolVersion = ProtocolVersion::new(0, 9, 1);

    pub const fn new(major: u8, minor: u8, revision: u8) -> Self {
        Self {
            major,
            minor,
            revision,
        }
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::AMQP_0_9_1
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.major, self.minor, self.revision)
    }
}

impl FromStr for ProtocolVersion {
    type Err = String;

    /// Parses `0-9-1`, `0-9` or `0.9.1` style strings.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = input.trim().split(['-', '.']).collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(format!(
                "invalid protocol version '{input}': expected '<major>-<minor>[-<revision>]'"
            ));
        }

        let mut numbers = [0u8; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = part
                .parse::<u8>()
                .map_err(|_| format!("invalid protocol version '{input}': non-numeric '{part}'"))?;
        }

        Ok(Self::new(numbers[0], numbers[1], numbers[2]))
    }
}

/// Which address families to try, and in what order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FamilyPreference {
    /// Try IPv6 first, fall back to IPv4.
    #[default]
    PreferIpv6,
    /// Try IPv4 first, fall back to IPv6.
    PreferIpv4,
    /// Never fall back to IPv4.
    Ipv6Only,
    /// Never try IPv6.
    Ipv4Only,
}

/// Security upgrade settings carried by an [`Endpoint`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Upgrade the stream before any protocol byte is exchanged.
    pub enabled: bool,
    /// Name to verify the peer certificate against. Defaults to the endpoint host.
    pub server_name: Option<String>,
}

/// Where and how to connect. Immutable once a connection attempt starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub protocol: ProtocolVersion,
    #[serde(default)]
    pub family: FamilyPreference,
    #[serde(default)]
    pub tls: TlsSettings,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Endpoint {
    /// Plain TCP endpoint speaking AMQP 0-9-1.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            protocol: ProtocolVersion::default(),
            family: FamilyPreference::default(),
            tls: TlsSettings::default(),
        }
    }

    pub fn with_protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_family(mut self, family: FamilyPreference) -> Self {
        self.family = family;
        self
    }

    /// Enable the security upgrade, optionally verifying against `server_name`.
    pub fn with_tls(mut self, server_name: Option<String>) -> Self {
        self.tls = TlsSettings {
            enabled: true,
            server_name,
        };
        self
    }

    /// Name used for certificate verification.
    pub fn tls_server_name(&self) -> &str {
        self.tls.server_name.as_deref().unwrap_or(&self.host)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls.enabled { "amqps" } else { "amqp" };
        if self.host.contains(':') {
            write!(f, "{scheme}://[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{scheme}://{}:{}", self.host, self.port)
        }
    }
}

/// Timeouts and limits applied to a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Bound on each individual connect attempt.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// Bound on each underlying read call. `None` waits forever.
    #[serde(with = "opt_millis")]
    pub read_timeout: Option<Duration>,
    /// Bound on each write operation. `None` waits forever.
    #[serde(with = "opt_millis")]
    pub write_timeout: Option<Duration>,
    /// Largest payload accepted from the peer before allocation.
    pub max_payload_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Some(Duration::from_secs(30)),
            write_timeout: Some(Duration::from_secs(30)),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
