//! Search configuration

use std::time::Duration;

/// Wall-clock budget for one task.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20 * 60);
/// Candidates per sequential chunk (deadline/cancel checked between chunks).
pub const DEFAULT_CHUNK_SIZE: u64 = 10_000;
/// Candidates per parallel batch.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;
/// Bytes per encoded candidate slot.
pub const DEFAULT_SLOT_WIDTH: usize = 128;

/// How the sequential strategy walks the range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SequentialMode {
    /// Uniform random draws from the range
    #[default]
    Random,
    /// In-order scan from `random_start`
    Scan,
}

/// Configuration for search operations
#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub timeout: Duration,
    pub chunk_size: u64,
    pub batch_size: usize,
    pub slot_width: usize,
    /// Number of host threads for the parallel kernel (0 = auto-detect)
    pub threads: usize,
    pub mode: SequentialMode,
}

impl SearchConfig {
    pub fn new(threads: usize) -> Self {
        Self {
            threads: if threads == 0 { num_cpus::get() } else { threads },
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_mode(mut self, mode: SequentialMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            slot_width: DEFAULT_SLOT_WIDTH,
            threads: num_cpus::get(),
            mode: SequentialMode::Random,
        }
    }
}
