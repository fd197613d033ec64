use emuccan_frame::build_handshake;

use crate::cmd::HandshakeArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_wire, OutputFormat};

pub fn run(args: HandshakeArgs, format: OutputFormat) -> CliResult<i32> {
    let kind = if args.inactive {
        "deactivate"
    } else {
        "activate"
    };
    print_wire(kind, &build_handshake(!args.inactive), format);
    Ok(SUCCESS)
}
