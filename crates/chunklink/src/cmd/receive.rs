use std::fs;
use std::sync::atomic::Ordering;

use chunklink_frame::{ChunkError, ChunkReader, ChunkReceiver, Delivery, LinkConfig};
use chunklink_transport::{ChunkSource, TransportError, UdpSource};
use tracing::info;

use crate::cmd::{install_ctrlc_handler, parse_duration, Endpoint, ReceiveArgs};
use crate::exit::{chunk_error, io_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};
use crate::sink::LatestFileSink;

pub fn run(args: ReceiveArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.link.to_config()?;
    let tick = parse_duration(&args.tick)?;
    let sink = LatestFileSink::create(&args.out, &args.extension, args.keep_all)
        .map_err(|err| io_error(&format!("failed creating {}", args.out.display()), err))?;

    match &args.source {
        Endpoint::Udp(addr) => {
            let source = UdpSource::bind(addr).map_err(|err| transport_error("bind failed", err))?;
            source
                .set_read_timeout(Some(tick))
                .map_err(|err| transport_error("socket setup failed", err))?;
            receive(source, sink, &config, &args, format, |source| {
                source.last_sender().map(|addr| addr.to_string())
            })
        }
        Endpoint::File(path) => {
            let file = fs::File::open(path)
                .map_err(|err| io_error(&format!("failed opening {}", path.display()), err))?;
            receive(ChunkReader::new(file), sink, &config, &args, format, |_| None)
        }
        Endpoint::Stdio => {
            let stdin = std::io::stdin().lock();
            receive(ChunkReader::new(stdin), sink, &config, &args, format, |_| None)
        }
    }
}

fn receive<S: ChunkSource>(
    source: S,
    sink: LatestFileSink,
    config: &LinkConfig,
    args: &ReceiveArgs,
    format: OutputFormat,
    sender: impl Fn(&S) -> Option<String>,
) -> CliResult<i32> {
    let running = install_ctrlc_handler()?;
    let mut rx = ChunkReceiver::new(source, sink, config);
    let mut completed = 0u64;

    while running.load(Ordering::SeqCst) {
        match rx.poll() {
            Ok(Some(Delivery::Complete(frame))) => {
                completed += 1;
                let peer = sender(rx.source());
                print_frame(&frame, rx.consumer().last_path(), peer.as_deref(), format);
                if args.count.is_some_and(|count| completed >= count) {
                    break;
                }
            }
            Ok(_) => {}
            // End of a stream source.
            Err(ChunkError::Transport(TransportError::Closed)) => break,
            Err(err) => return Err(chunk_error("receive failed", err)),
        }
    }

    let stats = rx.stats();
    info!(
        source = %args.source,
        frames = completed,
        written = rx.consumer().written(),
        chunks_accepted = stats.chunks_accepted,
        chunks_dropped = stats.chunks_dropped,
        frames_superseded = stats.frames_superseded,
        frames_evicted = stats.frames_evicted,
        frames_out_of_sequence = stats.frames_out_of_sequence,
        "receive finished"
    );
    Ok(SUCCESS)
}
