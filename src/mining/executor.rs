//! Search strategies - backend implementations for mining

use crate::error::MinerResult;
use crate::hash::CandidateInput;
use crate::mining::config::{SearchConfig, SequentialMode};
use crate::target::TargetChecker;
use crate::task::Task;

use rand::distributions::{Distribution, Uniform};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// Terminal state of one search
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchOutcome {
    Found { number: u64, hash: u32, attempts: u64 },
    TimedOut { attempts: u64 },
    /// Scan mode walked the whole range without a match.
    Exhausted { attempts: u64 },
    Cancelled { attempts: u64 },
}

impl SearchOutcome {
    pub fn attempts(&self) -> u64 {
        match self {
            SearchOutcome::Found { attempts, .. }
            | SearchOutcome::TimedOut { attempts }
            | SearchOutcome::Exhausted { attempts }
            | SearchOutcome::Cancelled { attempts } => *attempts,
        }
    }
}

/// Trait for search execution backends
///
/// Implementations check `deadline` and `cancel` at least once per unit of
/// work (chunk or batch) and add to `total_attempts` as they go.
pub trait SearchStrategy: Send + Sync {
    /// Human-readable strategy name (for logs).
    fn name(&self) -> &'static str;

    fn search(
        &self,
        task: &Task,
        target: &TargetChecker,
        deadline: Instant,
        total_attempts: &AtomicU64,
        cancel: &AtomicBool,
    ) -> MinerResult<SearchOutcome>;
}

/// Single-threaded chunked search
pub struct SequentialStrategy {
    chunk_size: u64,
    mode: SequentialMode,
}

impl SequentialStrategy {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            mode: config.mode,
        }
    }

    fn search_random(
        &self,
        task: &Task,
        target: &TargetChecker,
        deadline: Instant,
        total_attempts: &AtomicU64,
        cancel: &AtomicBool,
    ) -> SearchOutcome {
        let mut input = CandidateInput::new(&task.base_string_chain, &task.blockchain_content);
        let range = Uniform::new_inclusive(task.random_start, task.random_end);
        let mut rng = rand::thread_rng();
        let mut attempts = 0u64;

        loop {
            if cancel.load(Ordering::Relaxed) {
                return SearchOutcome::Cancelled { attempts };
            }
            if Instant::now() >= deadline {
                return SearchOutcome::TimedOut { attempts };
            }

            for i in 0..self.chunk_size {
                let number = range.sample(&mut rng);
                let hash = input.hash(number);
                if target.matches(hash) {
                    total_attempts.fetch_add(i + 1, Ordering::Relaxed);
                    return SearchOutcome::Found {
                        number,
                        hash,
                        attempts: attempts + i + 1,
                    };
                }
            }

            attempts += self.chunk_size;
            total_attempts.fetch_add(self.chunk_size, Ordering::Relaxed);
        }
    }

    fn search_scan(
        &self,
        task: &Task,
        target: &TargetChecker,
        deadline: Instant,
        total_attempts: &AtomicU64,
        cancel: &AtomicBool,
    ) -> SearchOutcome {
        let mut input = CandidateInput::new(&task.base_string_chain, &task.blockchain_content);
        let mut next = Some(task.random_start);
        let mut attempts = 0u64;

        while let Some(start) = next {
            if cancel.load(Ordering::Relaxed) {
                return SearchOutcome::Cancelled { attempts };
            }
            if Instant::now() >= deadline {
                return SearchOutcome::TimedOut { attempts };
            }

            let end = start
                .saturating_add(self.chunk_size - 1)
                .min(task.random_end);

            for number in start..=end {
                let hash = input.hash(number);
                if target.matches(hash) {
                    let done = number - start + 1;
                    total_attempts.fetch_add(done, Ordering::Relaxed);
                    return SearchOutcome::Found {
                        number,
                        hash,
                        attempts: attempts + done,
                    };
                }
            }

            let done = end - start + 1;
            attempts += done;
            total_attempts.fetch_add(done, Ordering::Relaxed);

            next = if end < task.random_end { Some(end + 1) } else { None };
        }

        SearchOutcome::Exhausted { attempts }
    }
}

impl SearchStrategy for SequentialStrategy {
    fn name(&self) -> &'static str {
        match self.mode {
            SequentialMode::Random => "cpu-random",
            SequentialMode::Scan => "cpu-scan",
        }
    }

    fn search(
        &self,
        task: &Task,
        target: &TargetChecker,
        deadline: Instant,
        total_attempts: &AtomicU64,
        cancel: &AtomicBool,
    ) -> MinerResult<SearchOutcome> {
        Ok(match self.mode {
            SequentialMode::Random => {
                self.search_random(task, target, deadline, total_attempts, cancel)
            }
            SequentialMode::Scan => self.search_scan(task, target, deadline, total_attempts, cancel),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hex_digest;
    use std::time::Duration;

    fn run(strategy: &SequentialStrategy, task: &Task, budget: Duration) -> SearchOutcome {
        let target = task.target().unwrap();
        let attempts = AtomicU64::new(0);
        let cancel = AtomicBool::new(false);
        strategy
            .search(task, &target, Instant::now() + budget, &attempts, &cancel)
            .unwrap()
    }

    fn scan() -> SequentialStrategy {
        SequentialStrategy::new(&SearchConfig::default().with_mode(SequentialMode::Scan))
    }

    /// Lowest number in the range whose hash starts with `prefix`, by brute force.
    fn first_match(task: &Task) -> Option<u64> {
        (task.random_start..=task.random_end).find(|n| {
            hex_digest(&format!("{}{}{}", n, task.base_string_chain, task.blockchain_content))
                .starts_with(&task.prefix)
        })
    }

    #[test]
    fn test_random_finds_match_in_range() {
        let task = Task::new(0, 99, "a", "b", "0");
        let strategy = SequentialStrategy::new(&SearchConfig::default().with_chunk_size(16));
        match run(&strategy, &task, Duration::from_secs(5)) {
            SearchOutcome::Found { number, hash, .. } => {
                assert!(number <= 99);
                let hex = crate::hash::to_hex(hash);
                assert!(hex.starts_with('0'));
                assert_eq!(hex, hex_digest(&format!("{number}ab")));
            }
            SearchOutcome::TimedOut { .. } => {
                // Only acceptable when nothing in the range matches.
                assert_eq!(first_match(&task), None);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_scan_finds_first_match() {
        let task = Task::new(0, 5_000, "seed", "content", "00");
        let expected = first_match(&task);
        match run(&scan(), &task, Duration::from_secs(5)) {
            SearchOutcome::Found { number, attempts, .. } => {
                assert_eq!(Some(number), expected);
                assert_eq!(attempts, number + 1);
            }
            SearchOutcome::Exhausted { attempts } => {
                assert_eq!(expected, None);
                assert_eq!(attempts, 5_001);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_scan_exhausts_without_match() {
        // A full 8-char prefix almost never matches in 10 numbers.
        let mut task = Task::new(10, 19, "x", "y", "");
        let taken: Vec<String> = (10..=19).map(|n| hex_digest(&format!("{n}xy"))).collect();
        let unused = (0u32..)
            .map(crate::hash::to_hex)
            .find(|h| !taken.contains(h))
            .unwrap();
        task.prefix = unused;

        let strategy = SequentialStrategy::new(
            &SearchConfig::default()
                .with_mode(SequentialMode::Scan)
                .with_chunk_size(3),
        );
        assert_eq!(
            run(&strategy, &task, Duration::from_secs(5)),
            SearchOutcome::Exhausted { attempts: 10 }
        );
    }

    #[test]
    fn test_scan_handles_top_of_range() {
        let task = Task::new(u64::MAX - 4, u64::MAX, "", "", "");
        match run(&scan(), &task, Duration::from_secs(5)) {
            SearchOutcome::Found { number, .. } => assert_eq!(number, u64::MAX - 4),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let task = Task::new(0, 99, "a", "b", "0");
        let strategy = SequentialStrategy::new(&SearchConfig::default());
        assert_eq!(
            run(&strategy, &task, Duration::ZERO),
            SearchOutcome::TimedOut { attempts: 0 }
        );
    }

    #[test]
    fn test_unmatchable_prefix_times_out() {
        // Single-number range with a prefix it doesn't have: only the deadline ends it.
        let hash = hex_digest("7ab");
        let other = if hash.starts_with('f') { "0" } else { "f" };
        let task = Task::new(7, 7, "a", "b", other);
        let strategy = SequentialStrategy::new(&SearchConfig::default().with_chunk_size(100));
        match run(&strategy, &task, Duration::from_millis(50)) {
            SearchOutcome::TimedOut { attempts } => assert!(attempts > 0),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_cancel_is_observed() {
        let task = Task::new(0, 99, "a", "b", "ffffffff");
        let target = task.target().unwrap();
        let attempts = AtomicU64::new(0);
        let cancel = AtomicBool::new(true);
        let outcome = SequentialStrategy::new(&SearchConfig::default())
            .search(&task, &target, Instant::now() + Duration::from_secs(60), &attempts, &cancel)
            .unwrap();
        assert_eq!(outcome, SearchOutcome::Cancelled { attempts: 0 });
    }

    #[test]
    fn test_attempt_counter_tracks_progress() {
        let task = Task::new(0, 3, "", "", "");
        let target = task.target().unwrap();
        let attempts = AtomicU64::new(0);
        let cancel = AtomicBool::new(false);
        let outcome = scan()
            .search(&task, &target, Instant::now() + Duration::from_secs(1), &attempts, &cancel)
            .unwrap();
        assert_eq!(outcome, SearchOutcome::Found { number: 0, hash: crate::hash::enhanced_hash(b"0"), attempts: 1 });
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
    }
}
