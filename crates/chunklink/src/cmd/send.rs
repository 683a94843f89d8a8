use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use chunklink_frame::{ChunkError, ChunkTransmitter, LinkConfig};
use chunklink_transport::{AlwaysReady, Link, StreamLink, UdpLink};
use tracing::{info, warn};

use crate::cmd::{install_ctrlc_handler, Endpoint, SendArgs};
use crate::exit::{chunk_error, io_error, transport_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_sent, OutputFormat};

/// One frame's worth of input and where it came from.
#[derive(Debug)]
struct Input {
    label: String,
    bytes: Vec<u8>,
}

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.link.to_config()?;
    let inputs = resolve_inputs(&args)?;

    match &args.target {
        Endpoint::Udp(addr) => {
            let link = UdpLink::connect(addr).map_err(|err| transport_error("connect failed", err))?;
            transmit(link, config, &inputs, &args, Some(format))
        }
        Endpoint::File(path) => {
            let file = fs::File::create(path)
                .map_err(|err| io_error(&format!("failed creating {}", path.display()), err))?;
            transmit(StreamLink::new(file), config, &inputs, &args, Some(format))
        }
        // Stdout carries the chunk stream, so no output records are printed.
        Endpoint::Stdio => {
            let stdout = BufWriter::new(std::io::stdout().lock());
            transmit(StreamLink::new(stdout), config, &inputs, &args, None)
        }
    }
}

fn transmit<L: Link>(
    link: L,
    config: LinkConfig,
    inputs: &[Input],
    args: &SendArgs,
    format: Option<OutputFormat>,
) -> CliResult<i32> {
    let running = install_ctrlc_handler()?;
    let mut tx = ChunkTransmitter::new(link, AlwaysReady, config)
        .map_err(|err| chunk_error("invalid link settings", err))?
        .with_first_frame_id(args.first_frame_id);

    let mut sent = 0u64;
    let mut last_error: Option<ChunkError> = None;
    let mut pass = 0u64;

    'passes: while args.repeat == 0 || pass < args.repeat {
        for input in inputs {
            if !running.load(Ordering::SeqCst) {
                break 'passes;
            }
            if sent > 0 || last_error.is_some() {
                tx.pace();
            }

            match tx.send_frame(&input.bytes) {
                Ok(report) => {
                    sent += 1;
                    if let Some(format) = format {
                        print_sent(&report, &input.label, format);
                    }
                }
                Err(err) => {
                    warn!(source = %input.label, error = %err, "frame not sent");
                    last_error = Some(err);
                }
            }
        }
        pass += 1;
    }

    info!(target_endpoint = %args.target, frames = sent, "send finished");
    match last_error {
        Some(err) => Err(chunk_error("one or more frames failed", err)),
        None => Ok(SUCCESS),
    }
}

fn resolve_inputs(args: &SendArgs) -> CliResult<Vec<Input>> {
    let mut inputs = Vec::new();

    if let Some(data) = &args.data {
        inputs.push(Input {
            label: "--data".to_string(),
            bytes: data.as_bytes().to_vec(),
        });
    }
    for path in &args.file {
        inputs.push(read_input(path)?);
    }
    if let Some(dir) = &args.dir {
        for path in dir_files(dir)? {
            inputs.push(read_input(&path)?);
        }
    }

    if inputs.is_empty() {
        return Err(CliError::new(
            USAGE,
            "nothing to send: pass --data, --file or --dir",
        ));
    }
    Ok(inputs)
}

fn read_input(path: &Path) -> CliResult<Input> {
    let bytes = fs::read(path)
        .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
    Ok(Input {
        label: path.display().to_string(),
        bytes,
    })
}

fn dir_files(dir: &Path) -> CliResult<Vec<PathBuf>> {
    let context = format!("failed listing {}", dir.display());
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|err| io_error(&context, err))? {
        let entry = entry.map_err(|err| io_error(&context, err))?;
        if entry
            .file_type()
            .map_err(|err| io_error(&context, err))?
            .is_file()
        {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
