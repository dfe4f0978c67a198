use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("groundlink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: groundlink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("GROUNDLINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "transports: serial, tcp{}",
        if cfg!(unix) { ", unix" } else { "" }
    );
    println!(
        "frame: sync 'pl', max payload {} bytes, max file chunk {} bytes",
        groundlink_frame::MAX_PAYLOAD,
        groundlink_frame::message::file::MAX_CHUNK
    );

    Ok(SUCCESS)
}
