//! Batched parallel search
//!
//! Each batch draws random candidates, encodes every candidate input into a
//! fixed-width zero-padded slot, and hands the whole batch to a [`HashKernel`].
//! The host then scans the hashes in order and takes the first match.

use crate::error::MinerResult;
use crate::hash::{CandidateInput, enhanced_hash};
use crate::mining::config::SearchConfig;
use crate::mining::executor::{SearchOutcome, SearchStrategy, SequentialStrategy};
use crate::target::TargetChecker;
use crate::task::Task;

use rand::distributions::{Distribution, Uniform};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

/// A batch of candidate inputs laid out for a hash kernel.
///
/// `slots` holds `len() * width` bytes; slot `i` is the input for
/// `numbers[i]`, zero padded past `lens[i]`.
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    width: usize,
    slots: Vec<u8>,
    lens: Vec<u32>,
    numbers: Vec<u64>,
}

impl EncodedBatch {
    pub fn new(width: usize, capacity: usize) -> Self {
        Self {
            width,
            slots: Vec::with_capacity(width * capacity),
            lens: Vec::with_capacity(capacity),
            numbers: Vec::with_capacity(capacity),
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.lens.clear();
        self.numbers.clear();
    }

    /// Append one candidate. Returns false if `input` does not fit a slot.
    pub fn push(&mut self, number: u64, input: &[u8]) -> bool {
        if input.len() > self.width {
            return false;
        }
        self.slots.extend_from_slice(input);
        self.slots.resize(self.slots.len() + self.width - input.len(), 0);
        self.lens.push(input.len() as u32);
        self.numbers.push(number);
        true
    }

    pub fn len(&self) -> usize {
        self.numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Meaningful bytes of slot `i`.
    pub fn slot(&self, i: usize) -> &[u8] {
        let start = i * self.width;
        &self.slots[start..start + self.lens[i] as usize]
    }

    pub fn slots(&self) -> &[u8] {
        &self.slots
    }

    pub fn lens(&self) -> &[u32] {
        &self.lens
    }

    pub fn number(&self, i: usize) -> u64 {
        self.numbers[i]
    }
}

/// Computes the enhanced hash of every slot in a batch.
///
/// `out` is resized to `batch.len()` and `out[i]` must equal
/// `enhanced_hash(batch.slot(i))`.
pub trait HashKernel: Send + Sync {
    fn name(&self) -> &'static str;

    fn hash_batch(&self, batch: &EncodedBatch, out: &mut Vec<u32>) -> MinerResult<()>;
}

/// Data-parallel kernel on a dedicated rayon pool.
pub struct HostKernel {
    pool: rayon::ThreadPool,
}

impl HostKernel {
    pub fn new(threads: usize) -> MinerResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("hash-kernel-{i}"))
            .build()?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl HashKernel for HostKernel {
    fn name(&self) -> &'static str {
        "host"
    }

    fn hash_batch(&self, batch: &EncodedBatch, out: &mut Vec<u32>) -> MinerResult<()> {
        out.clear();
        out.resize(batch.len(), 0);
        self.pool.install(|| {
            out.par_iter_mut()
                .enumerate()
                .for_each(|(i, h)| *h = enhanced_hash(batch.slot(i)));
        });
        Ok(())
    }
}

/// Decimal digit count of `n`.
fn decimal_len(n: u64) -> usize {
    n.checked_ilog10().map_or(1, |d| d as usize + 1)
}

/// Random batched search over a [`HashKernel`].
pub struct ParallelStrategy<K> {
    kernel: K,
    batch_size: usize,
    slot_width: usize,
    fallback: SequentialStrategy,
}

impl<K: HashKernel> ParallelStrategy<K> {
    pub fn new(kernel: K, config: &SearchConfig) -> Self {
        Self {
            kernel,
            batch_size: config.batch_size.max(1),
            slot_width: config.slot_width,
            fallback: SequentialStrategy::new(config),
        }
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Whether every candidate of `task` fits in a slot.
    pub fn fits(&self, task: &Task) -> bool {
        let suffix = task.base_string_chain.len() + task.blockchain_content.len();
        decimal_len(task.random_end) + suffix <= self.slot_width
    }
}

impl<K: HashKernel> SearchStrategy for ParallelStrategy<K> {
    fn name(&self) -> &'static str {
        self.kernel.name()
    }

    fn search(
        &self,
        task: &Task,
        target: &TargetChecker,
        deadline: Instant,
        total_attempts: &AtomicU64,
        cancel: &AtomicBool,
    ) -> MinerResult<SearchOutcome> {
        if !self.fits(task) {
            warn!(
                width = self.slot_width,
                "Task input exceeds the kernel slot width, searching sequentially"
            );
            return self
                .fallback
                .search(task, target, deadline, total_attempts, cancel);
        }

        let mut input = CandidateInput::new(&task.base_string_chain, &task.blockchain_content);
        let range = Uniform::new_inclusive(task.random_start, task.random_end);
        let mut rng = rand::thread_rng();
        let mut batch = EncodedBatch::new(self.slot_width, self.batch_size);
        let mut hashes = Vec::with_capacity(self.batch_size);
        let mut attempts = 0u64;

        loop {
            if cancel.load(Ordering::Relaxed) {
                return Ok(SearchOutcome::Cancelled { attempts });
            }
            if Instant::now() >= deadline {
                return Ok(SearchOutcome::TimedOut { attempts });
            }

            batch.clear();
            for _ in 0..self.batch_size {
                let number = range.sample(&mut rng);
                // Cannot fail: fits() bounds every candidate.
                batch.push(number, input.build(number));
            }

            self.kernel.hash_batch(&batch, &mut hashes)?;

            if let Some(i) = hashes.iter().position(|&h| target.matches(h)) {
                let done = i as u64 + 1;
                total_attempts.fetch_add(done, Ordering::Relaxed);
                return Ok(SearchOutcome::Found {
                    number: batch.number(i),
                    hash: hashes[i],
                    attempts: attempts + done,
                });
            }

            attempts += batch.len() as u64;
            total_attempts.fetch_add(batch.len() as u64, Ordering::Relaxed);
            debug!(attempts, kernel = self.kernel.name(), "batch exhausted");
        }
    }
}
