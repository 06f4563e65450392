use labcomm_frame::{encode, MAX_PAYLOAD};

use crate::cmd::CrcArgs;
use crate::exit::{frame_error, CliResult, SUCCESS};
use crate::output::{print_crc, CrcReport, OutputFormat};

pub fn run(args: CrcArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = args.payload.resolve()?;
    let wire = if payload.len() <= MAX_PAYLOAD {
        Some(encode(&payload).map_err(|err| frame_error("failed to encode frame", err))?)
    } else {
        None
    };

    let report = CrcReport::new(&payload, wire.as_deref());
    print_crc(&report, wire.as_deref(), format);
    Ok(SUCCESS)
}
