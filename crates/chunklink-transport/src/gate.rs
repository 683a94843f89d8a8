//! Receiver-controlled readiness gating.
//!
//! The link itself has no backpressure, so the receiving side exposes a single
//! boolean ("ready for the next transfer") that the sender must observe before
//! every transfer. The sender never waits unboundedly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Something the sender can block on until the receiver is ready.
///
/// The polling implementation is [`PollingGate`]; an interrupt or
/// condition-variable driven gate can be substituted without touching the
/// transmitter.
pub trait ReadinessGate {
    /// Block until the receiver signals ready or `timeout` elapses.
    ///
    /// Returns `true` if readiness was observed in time.
    fn wait_ready(&mut self, timeout: Duration) -> bool;

    /// Current level of the signal, without waiting.
    fn is_ready(&self) -> bool;
}

impl<G: ReadinessGate + ?Sized> ReadinessGate for &mut G {
    fn wait_ready(&mut self, timeout: Duration) -> bool {
        (**self).wait_ready(timeout)
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

/// A readable ready/not-ready level (a GPIO input, a shared flag).
pub trait ReadySignal {
    fn is_ready(&self) -> bool;
}

impl<F: Fn() -> bool> ReadySignal for F {
    fn is_ready(&self) -> bool {
        self()
    }
}

/// Shared in-process ready line.
///
/// Clones observe the same level. The receiving side is the only writer.
#[derive(Debug, Clone, Default)]
pub struct ReadyFlag {
    level: Arc<AtomicBool>,
}

impl ReadyFlag {
    /// Create a flag with the given initial level.
    pub fn new(ready: bool) -> Self {
        Self {
            level: Arc::new(AtomicBool::new(ready)),
        }
    }

    /// Drive the line.
    pub fn set_ready(&self, ready: bool) {
        self.level.store(ready, Ordering::Release);
    }

    /// Sample the line.
    pub fn is_ready(&self) -> bool {
        self.level.load(Ordering::Acquire)
    }
}

impl ReadySignal for ReadyFlag {
    fn is_ready(&self) -> bool {
        ReadyFlag::is_ready(self)
    }
}

/// Samples a [`ReadySignal`] at a fixed interval until it is ready or the
/// caller's timeout runs out.
#[derive(Debug, Clone)]
pub struct PollingGate<S> {
    signal: S,
    poll_interval: Duration,
}

impl<S: ReadySignal> PollingGate<S> {
    /// Create a gate polling `signal` every `poll_interval`.
    pub fn new(signal: S, poll_interval: Duration) -> Self {
        Self {
            signal,
            poll_interval,
        }
    }

    /// Interval between samples.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Borrow the underlying signal.
    pub fn signal(&self) -> &S {
        &self.signal
    }
}

impl<S: ReadySignal> ReadinessGate for PollingGate<S> {
    fn wait_ready(&mut self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if self.signal.is_ready() {
                return true;
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return false;
            }
            // Never oversleep the deadline.
            std::thread::sleep(self.poll_interval.min(timeout - elapsed));
        }
    }

    fn is_ready(&self) -> bool {
        self.signal.is_ready()
    }
}

/// Gate for links that carry their own flow control (sockets, files).
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReady;

impl ReadinessGate for AlwaysReady {
    fn wait_ready(&mut self, _timeout: Duration) -> bool {
        true
    }

    fn is_ready(&self) -> bool {
        true
    }
}
