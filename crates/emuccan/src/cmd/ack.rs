use emuccan_frame::{verify_handshake_ack, ACK_LEN};

use crate::cmd::AckArgs;
use crate::exit::{CliError, CliResult, DATA_INVALID, FAILURE, SUCCESS};
use crate::output::{parse_hex, print_ack, OutputFormat};

pub fn run(args: AckArgs, format: OutputFormat) -> CliResult<i32> {
    let bytes = parse_hex(&args.hex).map_err(CliError::usage)?;
    let result = verify_handshake_ack(&bytes).ok_or_else(|| {
        CliError::new(
            DATA_INVALID,
            format!("not an activation ack (expected {ACK_LEN} bytes 61 ss cc 0D 0A)"),
        )
    })?;

    print_ack(&bytes, &result, format);
    Ok(if result.is_ok() { SUCCESS } else { FAILURE })
}
