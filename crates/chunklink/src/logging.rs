use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, Registry};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Verbosity, ordered from quietest to noisiest.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }

    /// Per-chunk events come from the transport and frame crates; name them
    /// once those events are shown.
    fn shows_targets(self) -> bool {
        self >= LogLevel::Debug
    }

    fn shows_threads(self) -> bool {
        self == LogLevel::Trace
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn stderr_layer(format: LogFormat, level: LogLevel) -> BoxedLayer {
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(level.shows_targets())
        .with_thread_names(level.shows_threads());

    let layer = match format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().with_current_span(false).boxed(),
    };
    layer.with_filter(level.filter()).boxed()
}

/// Install the process-wide stderr subscriber.
///
/// Stdout is left alone: it carries output records, or the chunk stream when
/// the send target is `-`. Returns false if a subscriber was already set.
pub fn init_logging(format: LogFormat, level: LogLevel) -> bool {
    tracing_subscriber::registry()
        .with(stderr_layer(format, level))
        .try_init()
        .is_ok()
}
