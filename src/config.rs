//! Centralized configuration.
//!
//! All tunable parameters live here so components don't scatter hard-coded
//! values. Every struct has sensible defaults; embedders override fields as
//! needed.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for all kelp components.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub conn: ConnConfig,
    pub repair: RepairConfig,
    pub storage: StorageConfig,
}

/// Peer connection configuration.
#[derive(Debug, Clone)]
pub struct ConnConfig {
    /// Capacity of the outbound message queue.
    pub sender_buffer_size: usize,
    /// Capacity of the inbound message queue.
    pub receiver_buffer_size: usize,
    /// Deadline for a single framed read (including payload reads).
    pub read_timeout: Duration,
    /// Deadline for a single framed write (including payload writes).
    pub write_timeout: Duration,
    /// Skips egress rate limiting entirely when set.
    pub disable_throttling: bool,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            sender_buffer_size: 64,
            receiver_buffer_size: 64,
            read_timeout: Duration::from_secs(120),
            write_timeout: Duration::from_secs(30),
            disable_throttling: false,
        }
    }
}

/// Retry backoff behavior for blob repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffMode {
    /// A fixed inter-attempt delay of `retry_delay * (2 << num_retries)`,
    /// matching the timing the repair endpoint has always exhibited.
    #[default]
    Constant,
    /// Per-attempt exponential backoff: `retry_delay * 2^attempt`.
    Exponential,
}

/// Batch blob repair configuration.
#[derive(Debug, Clone)]
pub struct RepairConfig {
    /// Number of concurrent transfer workers.
    pub num_workers: usize,
    /// Attempts per digest before reporting failure.
    pub num_retries: usize,
    /// Base delay between attempts.
    pub retry_delay: Duration,
    /// How the inter-attempt delay grows.
    pub backoff: BackoffMode,
}

impl RepairConfig {
    /// The delay to sleep after the given failed attempt (0-based).
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        match self.backoff {
            BackoffMode::Constant => self.retry_delay * (2u32 << self.num_retries.min(16) as u32),
            BackoffMode::Exponential => self.retry_delay * (1u32 << attempt.min(16) as u32),
        }
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            num_retries: 3,
            retry_delay: Duration::from_millis(200),
            backoff: BackoffMode::Constant,
        }
    }
}

/// Layer store directory layout.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Where in-progress layer downloads and their status sidecars live.
    pub download_dir: PathBuf,
    /// Where completed layers are installed on promotion.
    pub cache_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("/var/cache/kelp/download"),
            cache_dir: PathBuf::from("/var/cache/kelp/cache"),
        }
    }
}
