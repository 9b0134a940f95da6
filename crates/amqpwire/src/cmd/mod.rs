use std::path::PathBuf;

use amqpwire_transport::FamilyPreference;
use clap::{Args, Subcommand, ValueEnum};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod probe;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to a broker, send the protocol header and print its first frames.
    Probe(ProbeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Probe(args) => probe::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Family {
    PreferIpv6,
    PreferIpv4,
    Ipv6Only,
    Ipv4Only,
}

impl From<Family> for FamilyPreference {
    fn from(family: Family) -> Self {
        match family {
            Family::PreferIpv6 => FamilyPreference::PreferIpv6,
            Family::PreferIpv4 => FamilyPreference::PreferIpv4,
            Family::Ipv6Only => FamilyPreference::Ipv6Only,
            Family::Ipv4Only => FamilyPreference::Ipv4Only,
        }
    }
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Broker host name or address. Optional when --config names an endpoint.
    pub host: Option<String>,
    /// Broker port. Default: 5672, or 5671 with --tls.
    #[arg(long, short = 'p')]
    pub port: Option<u16>,
    /// Upgrade the connection with TLS before the protocol header.
    #[arg(long)]
    pub tls: bool,
    /// Certificate name to verify (implies --tls).
    #[arg(long, value_name = "NAME")]
    pub server_name: Option<String>,
    /// Address family order.
    #[arg(long, value_enum)]
    pub family: Option<Family>,
    /// Protocol version to announce (e.g. 0-9-1).
    #[arg(long, value_name = "VERSION")]
    pub protocol: Option<String>,
    /// Bound on each connect attempt (e.g. 5s, 500ms).
    #[arg(long, value_name = "DURATION")]
    pub connect_timeout: Option<String>,
    /// Bound on each read (e.g. 5s, 500ms).
    #[arg(long, value_name = "DURATION")]
    pub read_timeout: Option<String>,
    /// Number of frames to read before closing.
    #[arg(long, short = 'n', default_value = "1")]
    pub count: usize,
    /// JSON file with `endpoint` and `transport` sections. Flags win over file values.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
