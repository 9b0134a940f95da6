use std::path::Path;
use std::time::Duration;

use amqpwire_frame::FrameTransport;
use amqpwire_transport::{
    Connector, Endpoint, ProtocolVersion, TransportConfig, DEFAULT_PORT, DEFAULT_TLS_PORT,
};
use serde::Deserialize;
use tracing::{debug, info};

use crate::cmd::ProbeArgs;
use crate::exit::{frame_error, io_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_frame, OutputFormat};

/// Probe settings loaded from `--config`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProbeConfig {
    endpoint: Option<Endpoint>,
    transport: TransportConfig,
}

pub fn run(args: ProbeArgs, format: OutputFormat) -> CliResult<i32> {
    let (endpoint, config) = resolve(&args)?;
    let count = args.count.max(1);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("failed to start runtime", err))?;

    runtime.block_on(probe(endpoint, config, count, format))
}

async fn probe(
    endpoint: Endpoint,
    config: TransportConfig,
    count: usize,
    format: OutputFormat,
) -> CliResult<i32> {
    let connector = Connector::new(endpoint).with_config(config);
    let transport = FrameTransport::connect_with(&connector)
        .await
        .map_err(|err| frame_error("connect failed", err))?;
    let peer = transport.remote_addr();

    let result = exchange(&transport, count, format).await;
    transport.close().await;
    result?;

    info!(%peer, frames = count, "probe complete");
    Ok(SUCCESS)
}

async fn exchange(transport: &FrameTransport, count: usize, format: OutputFormat) -> CliResult<()> {
    transport
        .send_protocol_header()
        .await
        .map_err(|err| frame_error("protocol header", err))?;

    for _ in 0..count {
        let frame = transport
            .read_frame()
            .await
            .map_err(|err| frame_error("read failed", err))?;
        debug!(frame_type = %frame.frame_type, channel = frame.channel, size = frame.payload.len(), "frame received");
        print_frame(&frame, transport.remote_addr(), format);
    }
    Ok(())
}

fn resolve(args: &ProbeArgs) -> CliResult<(Endpoint, TransportConfig)> {
    let file = match &args.config {
        Some(path) => load_config(path)?,
        None => ProbeConfig::default(),
    };

    let mut endpoint = match (&args.host, file.endpoint) {
        (Some(host), Some(mut from_file)) => {
            from_file.host = host.clone();
            from_file
        }
        (Some(host), None) => Endpoint::new(host.clone(), DEFAULT_PORT),
        (None, Some(from_file)) => from_file,
        (None, None) => {
            return Err(CliError::usage(
                "a broker host is required (positional HOST or `endpoint.host` in --config)",
            ))
        }
    };

    if args.tls || args.server_name.is_some() {
        let server_name = args
            .server_name
            .clone()
            .or_else(|| endpoint.tls.server_name.take());
        endpoint = endpoint.with_tls(server_name);
        if args.port.is_none() && endpoint.port == DEFAULT_PORT {
            endpoint.port = DEFAULT_TLS_PORT;
        }
    }
    if let Some(port) = args.port {
        endpoint.port = port;
    }
    if let Some(family) = args.family {
        endpoint.family = family.into();
    }
    if let Some(protocol) = &args.protocol {
        let version: ProtocolVersion = protocol
            .parse()
            .map_err(|err| CliError::usage(format!("invalid --protocol: {err}")))?;
        endpoint.protocol = version;
    }

    let mut config = file.transport;
    if let Some(timeout) = &args.connect_timeout {
        config.connect_timeout = parse_timeout(timeout)?;
    }
    if let Some(timeout) = &args.read_timeout {
        config.read_timeout = Some(parse_timeout(timeout)?);
    }

    Ok((endpoint, config))
}

fn load_config(path: &Path) -> CliResult<ProbeConfig> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        CliError::new(USAGE, format!("failed to read {}: {err}", path.display()))
    })?;
    serde_json::from_str(&raw)
        .map_err(|err| CliError::new(USAGE, format!("invalid config {}: {err}", path.display())))
}

fn parse_timeout(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("timeout must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid timeout value: {input}")))?;
    if value == 0 {
        return Err(CliError::usage("timeout must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use amqpwire_transport::FamilyPreference;

    use super::*;
    use crate::cmd::Family;

    fn args(host: Option<&str>) -> ProbeArgs {
        ProbeArgs {
            host: host.map(str::to_string),
            port: None,
            tls: false,
            server_name: None,
            family: None,
            protocol: None,
            connect_timeout: None,
            read_timeout: None,
            count: 1,
            config: None,
        }
    }

    #[test]
    fn parse_timeout_units() {
        assert_eq!(parse_timeout("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_timeout("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_timeout("150ms").unwrap(), Duration::from_millis(150));
    }

    #[test]
    fn parse_timeout_rejects_zero_and_garbage() {
        assert_eq!(parse_timeout("0ms").unwrap_err().code, USAGE);
        assert_eq!(parse_timeout("soon").unwrap_err().code, USAGE);
        assert_eq!(parse_timeout("  ").unwrap_err().code, USAGE);
    }

    #[test]
    fn host_is_required() {
        assert_eq!(resolve(&args(None)).unwrap_err().code, USAGE);
    }

    #[test]
    fn flags_shape_the_endpoint() {
        let mut a = args(Some("broker.local"));
        a.server_name = Some("broker.example.com".into());
        a.family = Some(Family::Ipv4Only);
        a.read_timeout = Some("250ms".into());

        let (endpoint, config) = resolve(&a).unwrap();
        assert!(endpoint.tls.enabled);
        assert_eq!(endpoint.port, DEFAULT_TLS_PORT);
        assert_eq!(endpoint.tls_server_name(), "broker.example.com");
        assert_eq!(endpoint.family, FamilyPreference::Ipv4Only);
        assert_eq!(config.read_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn invalid_protocol_is_a_usage_error() {
        let mut a = args(Some("broker.local"));
        a.protocol = Some("nine".into());
        assert_eq!(resolve(&a).unwrap_err().code, USAGE);
    }

    #[test]
    fn config_file_supplies_defaults_and_flags_override() {
        let path = std::env::temp_dir().join(format!("amqpwire-probe-{}.json", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"endpoint":{{"host":"from-file","port":5999}},"transport":{{"connect_timeout":750}}}}"#
        )
        .unwrap();
        drop(file);

        let mut a = args(None);
        a.config = Some(path.clone());
        let (endpoint, config) = resolve(&a).unwrap();
        assert_eq!(endpoint.host, "from-file");
        assert_eq!(endpoint.port, 5999);
        assert_eq!(config.connect_timeout, Duration::from_millis(750));

        a.host = Some("override".into());
        a.port = Some(6000);
        let (endpoint, _) = resolve(&a).unwrap();
        assert_eq!(endpoint.host, "override");
        assert_eq!(endpoint.port, 6000);

        std::fs::remove_file(path).unwrap();
    }
}
