use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("labcomm {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: labcomm");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "build_target: {}",
        option_env!("LABCOMM_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "features: registry={}, async={}, cli=true",
        cfg!(feature = "registry"),
        cfg!(feature = "async")
    );
    println!(
        "frame: header=59 49 max_payload={} crc=0x{:04X}",
        labcomm_frame::MAX_PAYLOAD,
        labcomm_frame::crc::POLYNOMIAL
    );

    Ok(SUCCESS)
}
