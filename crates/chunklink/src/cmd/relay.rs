use std::sync::atomic::Ordering;

use chunklink_frame::{ChunkError, PairingRelay, RelayEvent};
use chunklink_transport::{ChunkSource, UdpLink, UdpSource};
use tracing::{info, warn};

use crate::cmd::{install_ctrlc_handler, parse_duration, RelayArgs};
use crate::exit::{chunk_error, transport_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_relay_summary, OutputFormat};

pub fn run(args: RelayArgs, format: OutputFormat) -> CliResult<i32> {
    if args.link_capacity == 0 {
        return Err(CliError::new(USAGE, "--link-capacity must be greater than zero"));
    }
    let tick = parse_duration(&args.tick)?;

    let mut source =
        UdpSource::bind(&args.listen).map_err(|err| transport_error("bind failed", err))?;
    source
        .set_read_timeout(Some(tick))
        .map_err(|err| transport_error("socket setup failed", err))?;
    let downstream =
        UdpLink::connect(&args.forward).map_err(|err| transport_error("connect failed", err))?;
    let mut relay = PairingRelay::new(downstream, args.link_capacity);

    let running = install_ctrlc_handler()?;
    info!(
        listen = %args.listen,
        forward = %args.forward,
        capacity = args.link_capacity,
        "relay running"
    );

    while running.load(Ordering::SeqCst) {
        let transfer = match source.recv_message() {
            Ok(Some(transfer)) => transfer,
            Ok(None) => continue,
            Err(err) => return Err(transport_error("receive failed", err)),
        };

        match relay.on_transfer(&transfer) {
            Ok(RelayEvent::Forwarded { .. }) => {
                if args
                    .count
                    .is_some_and(|count| relay.stats().forwarded >= count)
                {
                    break;
                }
            }
            Ok(_) => {}
            // Forwarding failures lose one chunk; the relay keeps serving.
            Err(ChunkError::Transport(err)) => {
                warn!(error = %err, forward = %args.forward, "forward failed");
            }
            Err(err) => return Err(chunk_error("relay failed", err)),
        }
    }

    print_relay_summary(relay.stats(), &args.listen, &args.forward, format);
    Ok(SUCCESS)
}
