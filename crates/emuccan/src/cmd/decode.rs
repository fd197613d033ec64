use emuccan_frame::{decode, WireFrame, WIRE_FRAME_LEN};

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{parse_hex, print_frame, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let bytes = parse_hex(&args.hex).map_err(CliError::usage)?;
    let wire: WireFrame = bytes.as_slice().try_into().map_err(|_| {
        CliError::new(
            DATA_INVALID,
            format!("expected {WIRE_FRAME_LEN} bytes, got {}", bytes.len()),
        )
    })?;

    let frame = decode(&wire).map_err(|err| frame_error("decode failed", err))?;
    print_frame(&frame, "stdin", format);
    Ok(SUCCESS)
}
