use emuccan_frame::{encode, IdType, LogicalFrame};

use crate::cmd::EncodeArgs;
use crate::exit::{frame_error, CliError, CliResult, SUCCESS};
use crate::output::{parse_hex, print_wire, OutputFormat};

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let frame = build_frame(&args)?;
    print_wire("frame", &encode(&frame), format);
    Ok(SUCCESS)
}

fn build_frame(args: &EncodeArgs) -> CliResult<LogicalFrame> {
    let id_type = if args.extended {
        IdType::Extended
    } else {
        IdType::Standard
    };

    let frame = if args.rtr {
        LogicalFrame::remote(args.channel, id_type, args.id, args.dlc)
    } else {
        let data = parse_hex(&args.data).map_err(CliError::usage)?;
        LogicalFrame::new(args.channel, id_type, args.id, &data)
    };
    frame.map_err(|err| frame_error("invalid frame", err))
}
