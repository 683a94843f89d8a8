use chunklink_frame::{decode_header, HEADER_SIZE};

use crate::cmd::InspectArgs;
use crate::exit::{chunk_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_header, OutputFormat};

pub fn run(args: InspectArgs, format: OutputFormat) -> CliResult<i32> {
    let bytes = parse_hex(&args.hex)?;
    let header = decode_header(&bytes).map_err(|err| chunk_error("cannot decode header", err))?;

    let available = (bytes.len() > HEADER_SIZE).then(|| bytes.len() - HEADER_SIZE);
    print_header(&header, available, format);
    Ok(SUCCESS)
}

/// Accepts an optional `0x` prefix and ignores whitespace, `:` and `-` separators.
fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let trimmed = input.trim();
    let digits: String = trimmed
        .strip_prefix("0x")
        .unwrap_or(trimmed)
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != '-')
        .collect();
    hex::decode(&digits).map_err(|err| CliError::new(USAGE, format!("invalid hex: {err}")))
}
