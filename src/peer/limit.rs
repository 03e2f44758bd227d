//! Egress bandwidth limiting using a token bucket.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// A token bucket shaping a connection's piece egress.
///
/// The burst capacity is fixed at construction to the torrent's maximum
/// piece length; the rate is settable at any time and applies from the
/// current instant. The bucket starts empty with a rate of zero, so no piece
/// traffic can leave until bandwidth is allocated with [`set_rate`].
///
/// Reservations carry debt: a successful reservation deducts its tokens
/// immediately (possibly driving the balance negative) and reports the delay
/// the caller must sleep before using it, which keeps the sustained rate
/// honest across consecutive sends.
///
/// [`set_rate`]: EgressLimiter::set_rate
#[derive(Debug)]
pub struct EgressLimiter {
    burst: f64,
    bucket: Mutex<TokenBucket>,
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    rate: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn refill(&mut self, burst: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.last_update = now;
        self.tokens = (self.tokens + elapsed * self.rate).min(burst);
    }
}

impl EgressLimiter {
    /// Creates a limiter with the given burst capacity, zero rate, and an
    /// empty bucket.
    pub fn new(burst: u64) -> Self {
        Self {
            burst: burst as f64,
            bucket: Mutex::new(TokenBucket {
                tokens: 0.0,
                rate: 0.0,
                last_update: Instant::now(),
            }),
        }
    }

    /// Updates the token rate, effective from the current instant.
    ///
    /// Tokens accrued under the old rate are kept.
    pub fn set_rate(&self, bytes_per_sec: u64) {
        let mut bucket = self.bucket.lock();
        bucket.refill(self.burst);
        bucket.rate = bytes_per_sec as f64;
    }

    /// Returns the current token rate in bytes per second.
    pub fn rate(&self) -> u64 {
        self.bucket.lock().rate as u64
    }

    /// Returns the burst capacity in bytes.
    pub fn burst(&self) -> u64 {
        self.burst as u64
    }

    /// Reserves `bytes` tokens against the current instant.
    ///
    /// Returns the delay to wait before the reservation may be used, or
    /// `None` if it can never be satisfied: the request exceeds the burst
    /// capacity, or the rate is zero and the stored tokens don't cover it.
    pub fn reserve(&self, bytes: usize) -> Option<Duration> {
        let mut bucket = self.bucket.lock();
        bucket.refill(self.burst);

        let bytes = bytes as f64;
        if bytes > self.burst {
            return None;
        }
        if bucket.tokens >= bytes {
            bucket.tokens -= bytes;
            return Some(Duration::ZERO);
        }
        if bucket.rate <= 0.0 {
            return None;
        }

        bucket.tokens -= bytes;
        Some(Duration::from_secs_f64(-bucket.tokens / bucket.rate))
    }
}
