use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    println!("emuccan {}", env!("CARGO_PKG_VERSION"));
    if !args.extended {
        return Ok(SUCCESS);
    }

    println!(
        "target: {}",
        option_env!("EMUCCAN_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "profile: {}",
        option_env!("EMUCCAN_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("os: {} ({})", std::env::consts::OS, std::env::consts::ARCH);
    println!("serial transport: {}", cfg!(unix));

    Ok(SUCCESS)
}
