//! Sends a few frames through a pairing relay and reassembles them, all on
//! loopback UDP.
//!
//! Run with:
//!   cargo run --example loopback
//!
//! The transmitter sends header and payload as separate datagrams to the
//! relay, which pairs them and forwards one datagram per chunk to the receiver.

use std::thread;
use std::time::{Duration, Instant};

use chunklink::frame::{
    AssembledFrame, ChunkReceiver, ChunkTransmitter, Delivery, LinkConfig, PairingRelay,
};
use chunklink::transport::{AlwaysReady, ChunkSource, UdpLink, UdpSource};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = LinkConfig {
        chunk_max: 512,
        frame_interval: Duration::from_millis(5),
        ..LinkConfig::default()
    };

    let receiver_source = UdpSource::bind("127.0.0.1:0")?;
    receiver_source.set_read_timeout(Some(Duration::from_secs(2)))?;
    let receiver_addr = receiver_source.local_addr()?;

    let mut relay_source = UdpSource::bind("127.0.0.1:0")?;
    relay_source.set_read_timeout(Some(Duration::from_millis(500)))?;
    let relay_addr = relay_source.local_addr()?;
    let mut relay = PairingRelay::new(
        UdpLink::connect(&receiver_addr.to_string())?,
        config.link_capacity,
    );

    let relay_thread = thread::spawn(move || {
        // Exits after the first quiet read timeout once traffic stops.
        while let Ok(Some(transfer)) = relay_source.recv_message() {
            if let Err(err) = relay.on_transfer(&transfer) {
                eprintln!("relay: {err}");
            }
        }
        relay.stats().clone()
    });

    let frames: Vec<Vec<u8>> = (0..3u8)
        .map(|i| (0..(1000 + i as usize * 700)).map(|n| (n % 251) as u8 ^ i).collect())
        .collect();

    let mut tx = ChunkTransmitter::new(
        UdpLink::connect(&relay_addr.to_string())?,
        AlwaysReady,
        config.clone(),
    )?;
    for frame in &frames {
        let report = tx.send_frame(frame)?;
        eprintln!(
            "sent frame {} ({} bytes, {} chunks)",
            report.frame_id, report.bytes, report.chunks
        );
        tx.pace();
    }

    let mut rx = ChunkReceiver::new(
        receiver_source,
        |_: &AssembledFrame| -> std::io::Result<()> { Ok(()) },
        &config,
    );
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut received = 0;
    while received < frames.len() && Instant::now() < deadline {
        if let Some(Delivery::Complete(frame)) = rx.poll()? {
            let intact = frames
                .iter()
                .any(|sent| sent.as_slice() == frame.payload.as_ref());
            eprintln!(
                "received frame {} ({} bytes, {} chunks), intact={intact}",
                frame.frame_id,
                frame.payload.len(),
                frame.chunks
            );
            received += 1;
        }
    }
    eprintln!(
        "{received}/{} frames reassembled, {} chunks dropped",
        frames.len(),
        rx.stats().chunks_dropped
    );

    let stats = relay_thread
        .join()
        .map_err(|_| "relay thread panicked")?;
    eprintln!("relay forwarded {} chunks", stats.forwarded);
    Ok(())
}
