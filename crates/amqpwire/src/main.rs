mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "amqpwire", version, about = "AMQP 0-9-1 wire probe")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    match cmd::run(cli.command, format) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_probe_subcommand() {
        let cli = Cli::try_parse_from([
            "amqpwire",
            "probe",
            "broker.local",
            "--port",
            "5673",
            "--family",
            "ipv4-only",
            "--read-timeout",
            "2s",
        ])
        .expect("probe args should parse");

        let Command::Probe(args) = cli.command else {
            panic!("expected probe");
        };
        assert_eq!(args.port, Some(5673));
        assert_eq!(args.family, Some(cmd::Family::Ipv4Only));
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from(["amqpwire", "version", "--format", "json", "--log-level", "debug"])
            .expect("global flags should parse");
        assert_eq!(cli.format, Some(OutputFormat::Json));
        assert_eq!(cli.log_level, LogLevel::Debug);
    }

    #[test]
    fn rejects_unknown_family() {
        let err = Cli::try_parse_from(["amqpwire", "probe", "h", "--family", "ipx"])
            .expect_err("unknown family should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }
}
