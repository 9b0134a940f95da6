use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("amqpwire {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: amqpwire");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target: {}", option_env!("AMQPWIRE_BUILD_TARGET").unwrap_or("unknown"));
    println!("profile: {}", option_env!("AMQPWIRE_BUILD_PROFILE").unwrap_or("unknown"));
    println!(
        "protocol: {}",
        amqpwire_transport::ProtocolVersion::default()
    );
    println!("features: tls={}, cli=true", cfg!(feature = "tls"));

    Ok(SUCCESS)
}
