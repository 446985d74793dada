use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Default sliding window for rate estimation.
const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

/// Default cap on retained rate samples.
const DEFAULT_MAX_SAMPLES: usize = 100;

/// A progress notification from the transmitter.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub bytes_transferred: u64,
    /// Declared size; 0 when unknown.
    pub total_size: u64,
    /// Integer percent in `0..=100`.
    pub percent: u8,
    pub bytes_per_second: f64,
    pub eta: Option<Duration>,
}

/// Decides when a transmitter reports progress.
///
/// Percent values handed out by [`record`](Self::record) are increasing, advance
/// by at least `step` points between events and stop at 99. Only
/// [`complete`](Self::complete), called once the transfer is confirmed, hands
/// out 100.
pub struct ProgressReporter {
    total_size: u64,
    step: u8,
    last_percent: Option<u8>,
    speed: SpeedCalculator,
}

impl ProgressReporter {
    pub fn new(total_size: u64, step: u8) -> Self {
        Self {
            total_size,
            step: step.max(1),
            last_percent: None,
            speed: SpeedCalculator::new(None, None),
        }
    }

    /// Records `chunk_len` more bytes (now `bytes_transferred` in total) and
    /// returns an event if the percent advanced far enough.
    pub fn record(&mut self, bytes_transferred: u64, chunk_len: u64) -> Option<Progress> {
        self.speed.add_sample(chunk_len);
        if self.total_size == 0 {
            return None;
        }

        let percent = percent_of(bytes_transferred, self.total_size).min(99);
        let due = match self.last_percent {
            Some(last) => percent >= last.saturating_add(self.step),
            None => percent >= self.step,
        };
        if !due {
            return None;
        }
        self.last_percent = Some(percent);
        Some(self.snapshot(bytes_transferred, percent))
    }

    /// Returns the final 100 event unless it was already handed out.
    pub fn complete(&mut self, bytes_transferred: u64) -> Option<Progress> {
        if self.last_percent == Some(100) {
            return None;
        }
        self.last_percent = Some(100);
        Some(self.snapshot(bytes_transferred, 100))
    }

    fn snapshot(&self, bytes_transferred: u64, percent: u8) -> Progress {
        let eta = if percent == 100 {
            Some(Duration::ZERO)
        } else {
            self.speed
                .eta(self.total_size.saturating_sub(bytes_transferred))
        };
        Progress {
            bytes_transferred,
            total_size: self.total_size,
            percent,
            bytes_per_second: self.speed.bytes_per_second(),
            eta,
        }
    }
}

fn percent_of(bytes: u64, total: u64) -> u8 {
    let pct = (bytes as u128 * 100) / total as u128;
    pct.min(100) as u8
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer rate over a sliding window of samples.
pub struct SpeedCalculator {
    samples: VecDeque<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl SpeedCalculator {
    /// - `window_size`: time window for the rate (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            samples: VecDeque::new(),
            max_samples: max_samples.unwrap_or(DEFAULT_MAX_SAMPLES).max(2),
            window_size: window_size.unwrap_or(DEFAULT_WINDOW),
        }
    }

    /// Records `bytes` transferred at the current instant.
    pub fn add_sample(&mut self, bytes: u64) {
        let now = Instant::now();
        self.samples.push_back(SpeedSample {
            bytes,
            timestamp: now,
        });

        while let Some(front) = self.samples.front() {
            if now.duration_since(front.timestamp) > self.window_size
                || self.samples.len() > self.max_samples
            {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Average bytes/second across the window; 0.0 with fewer than 2 samples.
    ///
    /// The first sample only marks the window start, its bytes are not
    /// counted.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if self.samples.len() < 2 || elapsed.is_zero() {
            return 0.0;
        }
        let bytes: u64 = self.samples.iter().skip(1).map(|s| s.bytes).sum();
        bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to move `remaining_bytes`; `None` while the rate is 0.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}
