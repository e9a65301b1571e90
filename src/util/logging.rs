//! # Frame Logging
//!
//! Frame dumps for protocol debugging and a small rate limiter that keeps a
//! noisy bus from flooding the log with identical warnings.

use std::time::{Duration, Instant};

/// Longest frame prefix written to the log.
const MAX_LOG_BYTES: usize = 64;

/// Direction of a frame on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Tx,
    Rx,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Tx => "TX",
            Direction::Rx => "RX",
        }
    }
}

/// Logs a raw frame as compact hex at debug level.
pub fn log_frame_hex(direction: Direction, data: &[u8]) {
    if !log::log_enabled!(target: "airios::frame", log::Level::Debug) {
        return;
    }

    let shown = &data[..data.len().min(MAX_LOG_BYTES)];
    let suffix = if data.len() > MAX_LOG_BYTES {
        format!(" ... ({} bytes total)", data.len())
    } else {
        String::new()
    };

    log::debug!(
        target: "airios::frame",
        "{} {}{suffix}",
        direction.as_str(),
        crate::util::hex::format_hex_compact(shown)
    );
}

/// Allows at most `cap` messages per `window`.
#[derive(Debug)]
pub struct LogThrottle {
    window: Duration,
    cap: u32,
    count: u32,
    suppressed: u32,
    t0: Instant,
}

impl LogThrottle {
    pub fn new(window: Duration, cap: u32) -> Self {
        Self {
            window,
            cap,
            count: 0,
            suppressed: 0,
            t0: Instant::now(),
        }
    }

    /// Whether the next message may be logged.
    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&mut self, now: Instant) -> bool {
        if now.duration_since(self.t0) > self.window {
            if self.suppressed > 0 {
                log::warn!("{} similar messages suppressed", self.suppressed);
            }
            self.t0 = now;
            self.count = 0;
            self.suppressed = 0;
        }

        self.count += 1;
        if self.count <= self.cap {
            true
        } else {
            self.suppressed += 1;
            false
        }
    }

    pub fn suppressed(&self) -> u32 {
        self.suppressed
    }
}
