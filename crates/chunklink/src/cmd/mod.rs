use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chunklink_frame::{LinkConfig, SequencePolicy};
use clap::{Args, Subcommand, ValueEnum};

use crate::exit::{config_error, io_error, CliError, CliResult, DATA_INVALID, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod inspect;
pub mod receive;
pub mod relay;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Split frames into chunks and transmit them.
    Send(SendArgs),
    /// Pair header and payload datagrams and forward them as one.
    Relay(RelayArgs),
    /// Reassemble frames and write each one to disk.
    Receive(ReceiveArgs),
    /// Decode a chunk header given as hex.
    Inspect(InspectArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format),
        Command::Relay(args) => relay::run(args, format),
        Command::Receive(args) => receive::run(args, format),
        Command::Inspect(args) => inspect::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Where chunks go to or come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// One transfer per datagram.
    Udp(String),
    /// Transfers back to back on stdin/stdout.
    Stdio,
    /// Transfers back to back in a file.
    File(PathBuf),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Udp(addr) => write!(f, "udp://{addr}"),
            Endpoint::Stdio => f.write_str("-"),
            Endpoint::File(path) => write!(f, "{}", path.display()),
        }
    }
}

pub fn parse_endpoint(input: &str) -> Result<Endpoint, String> {
    if let Some(addr) = input.strip_prefix("udp://") {
        if addr.is_empty() {
            return Err("udp endpoint needs HOST:PORT".to_string());
        }
        return Ok(Endpoint::Udp(addr.to_string()));
    }
    if input.contains("://") {
        return Err(format!("unsupported endpoint scheme: {input}"));
    }
    if input == "-" {
        return Ok(Endpoint::Stdio);
    }
    Ok(Endpoint::File(PathBuf::from(input)))
}

/// UDP address with an optional `udp://` prefix.
pub fn parse_udp_addr(input: &str) -> Result<String, String> {
    let addr = input.strip_prefix("udp://").unwrap_or(input);
    if addr.is_empty() || !addr.contains(':') {
        return Err(format!("expected HOST:PORT, got {input:?}"));
    }
    Ok(addr.to_string())
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum SequenceArg {
    /// Discard the open frame on any chunk_id gap or repeat.
    Strict,
    /// Append continuation chunks without checking chunk_id.
    TrustArrivalOrder,
}

impl From<SequenceArg> for SequencePolicy {
    fn from(arg: SequenceArg) -> Self {
        match arg {
            SequenceArg::Strict => SequencePolicy::Strict,
            SequenceArg::TrustArrivalOrder => SequencePolicy::TrustArrivalOrder,
        }
    }
}

/// Link tunables shared by the sending and receiving commands.
///
/// Values come from, in order of precedence: flags (or their environment
/// variables), `--config`, built-in defaults.
#[derive(Args, Debug, Default, Clone)]
pub struct LinkArgs {
    /// JSON file with link settings.
    #[arg(long, value_name = "PATH", env = "CHUNKLINK_CONFIG")]
    pub config: Option<PathBuf>,
    /// Maximum payload bytes per chunk [default: 1400].
    #[arg(long, value_name = "BYTES", env = "CHUNKLINK_CHUNK_MAX")]
    pub chunk_max: Option<usize>,
    /// Largest transfer the receiving endpoint buffers [default: 2048].
    #[arg(long, value_name = "BYTES", env = "CHUNKLINK_LINK_CAPACITY")]
    pub link_capacity: Option<usize>,
    /// Bound on each readiness wait (e.g. 2s, 500ms) [default: 2s].
    #[arg(long, value_name = "DURATION", env = "CHUNKLINK_READY_TIMEOUT")]
    pub ready_timeout: Option<String>,
    /// Readiness sampling interval [default: 1ms].
    #[arg(long, value_name = "DURATION", env = "CHUNKLINK_POLL_INTERVAL")]
    pub poll_interval: Option<String>,
    /// Pause between frames when sending [default: 30ms].
    #[arg(long, value_name = "DURATION", env = "CHUNKLINK_FRAME_INTERVAL")]
    pub frame_interval: Option<String>,
    /// Evict an unfinished frame after this long without a chunk, or `off` [default: 5s].
    #[arg(long, value_name = "DURATION", env = "CHUNKLINK_IDLE_TIMEOUT")]
    pub idle_timeout: Option<String>,
    /// How continuation chunks are checked [default: strict].
    #[arg(long, value_enum, env = "CHUNKLINK_SEQUENCE")]
    pub sequence: Option<SequenceArg>,
}

impl LinkArgs {
    pub fn to_config(&self) -> CliResult<LinkConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => LinkConfig::default(),
        };

        if let Some(chunk_max) = self.chunk_max {
            config.chunk_max = chunk_max;
        }
        if let Some(capacity) = self.link_capacity {
            config.link_capacity = capacity;
        }
        if let Some(value) = &self.ready_timeout {
            config.ready_timeout = parse_duration(value)?;
        }
        if let Some(value) = &self.poll_interval {
            config.poll_interval = parse_duration(value)?;
        }
        if let Some(value) = &self.frame_interval {
            config.frame_interval = parse_duration_or_zero(value)?;
        }
        if let Some(value) = &self.idle_timeout {
            config.idle_timeout = if value.trim() == "off" {
                Duration::ZERO
            } else {
                parse_duration(value)?
            };
        }
        if let Some(sequence) = self.sequence {
            config.sequence = sequence.into();
        }

        config
            .validate()
            .map_err(|err| config_error("invalid link settings", err))?;
        Ok(config)
    }
}

fn load_config(path: &std::path::Path) -> CliResult<LinkConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
    serde_json::from_str(&text).map_err(|err| {
        CliError::new(
            DATA_INVALID,
            format!("invalid config {}: {err}", path.display()),
        )
    })
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Destination: udp://HOST:PORT, a file path, or - for stdout.
    #[arg(value_parser = parse_endpoint, env = "CHUNKLINK_TARGET")]
    pub target: Endpoint,
    /// Send each file as one frame.
    #[arg(long, value_name = "PATH", num_args = 1.., conflicts_with = "data")]
    pub file: Vec<PathBuf>,
    /// Send every regular file in a directory, in name order.
    #[arg(long, value_name = "DIR", conflicts_with = "data")]
    pub dir: Option<PathBuf>,
    /// Send a literal string as one frame.
    #[arg(long)]
    pub data: Option<String>,
    /// Pass over the input this many times; 0 repeats until interrupted.
    #[arg(long, default_value = "1", env = "CHUNKLINK_REPEAT")]
    pub repeat: u64,
    /// Frame id of the first frame sent.
    #[arg(long, default_value = "0")]
    pub first_frame_id: u32,
    #[command(flatten)]
    pub link: LinkArgs,
}

#[derive(Args, Debug)]
pub struct RelayArgs {
    /// Local address to receive header and payload datagrams on.
    #[arg(value_parser = parse_udp_addr, env = "CHUNKLINK_RELAY_LISTEN")]
    pub listen: String,
    /// Address to forward combined chunks to.
    #[arg(value_parser = parse_udp_addr, env = "CHUNKLINK_RELAY_FORWARD")]
    pub forward: String,
    /// Largest payload taken from one transfer.
    #[arg(long, value_name = "BYTES", default_value = "2048", env = "CHUNKLINK_LINK_CAPACITY")]
    pub link_capacity: usize,
    /// Exit after forwarding N chunks.
    #[arg(long)]
    pub count: Option<u64>,
    /// Socket read timeout used to check for interrupts.
    #[arg(long, default_value = "200ms")]
    pub tick: String,
}

#[derive(Args, Debug)]
pub struct ReceiveArgs {
    /// Source: udp://BIND_ADDR:PORT, a file path, or - for stdin.
    #[arg(value_parser = parse_endpoint, env = "CHUNKLINK_SOURCE")]
    pub source: Endpoint,
    /// Directory that receives latest.<EXT>.
    #[arg(long, value_name = "DIR", env = "CHUNKLINK_OUT")]
    pub out: PathBuf,
    /// File extension for written frames.
    #[arg(long, value_name = "EXT", default_value = "bin", env = "CHUNKLINK_EXTENSION")]
    pub extension: String,
    /// Also keep every frame as frame-<ID>.<EXT>.
    #[arg(long)]
    pub keep_all: bool,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<u64>,
    /// Socket read timeout used to sweep idle frames and check for interrupts.
    #[arg(long, default_value = "200ms")]
    pub tick: String,
    #[command(flatten)]
    pub link: LinkArgs,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Header bytes as hex, optionally followed by payload bytes.
    pub hex: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let duration = parse_duration_or_zero(input)?;
    if duration.is_zero() {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }
    Ok(duration)
}

fn parse_duration_or_zero(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// Flag cleared by Ctrl-C. Loops check it between reads.
pub fn install_ctrlc_handler() -> CliResult<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;
    Ok(running)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert_eq!(parse_duration_or_zero("0ms").unwrap(), Duration::ZERO);
    }

    #[test]
    fn endpoints() {
        assert_eq!(
            parse_endpoint("udp://127.0.0.1:5006").unwrap(),
            Endpoint::Udp("127.0.0.1:5006".into())
        );
        assert_eq!(parse_endpoint("-").unwrap(), Endpoint::Stdio);
        assert_eq!(
            parse_endpoint("capture.chunks").unwrap(),
            Endpoint::File(PathBuf::from("capture.chunks"))
        );
        assert!(parse_endpoint("udp://").is_err());
        assert!(parse_endpoint("tcp://host:1").is_err());
        assert_eq!(
            parse_endpoint("udp://0.0.0.0:5006").unwrap().to_string(),
            "udp://0.0.0.0:5006"
        );
    }

    #[test]
    fn udp_addr_prefix_is_optional() {
        assert_eq!(parse_udp_addr("udp://0.0.0.0:5005").unwrap(), "0.0.0.0:5005");
        assert_eq!(parse_udp_addr("127.0.0.1:9").unwrap(), "127.0.0.1:9");
        assert!(parse_udp_addr("localhost").is_err());
    }

    #[test]
    fn link_args_override_defaults() {
        let args = LinkArgs {
            chunk_max: Some(512),
            idle_timeout: Some("off".into()),
            frame_interval: Some("0".into()),
            sequence: Some(SequenceArg::TrustArrivalOrder),
            ..LinkArgs::default()
        };
        let config = args.to_config().unwrap();
        assert_eq!(config.chunk_max, 512);
        assert_eq!(config.idle_timeout, Duration::ZERO);
        assert_eq!(config.frame_interval, Duration::ZERO);
        assert_eq!(config.sequence, SequencePolicy::TrustArrivalOrder);
        assert_eq!(config.link_capacity, 2048);
    }

    #[test]
    fn link_args_reject_invalid_combination() {
        let args = LinkArgs {
            chunk_max: Some(4096),
            ..LinkArgs::default()
        };
        assert_eq!(args.to_config().unwrap_err().code, USAGE);
    }
}
