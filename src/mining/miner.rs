//! Strategy selection and result assembly

use crate::error::{MinerError, MinerResult};
use crate::hash::to_hex;
use crate::mining::config::SearchConfig;
use crate::mining::executor::{SearchOutcome, SearchStrategy, SequentialStrategy};
use crate::mining::parallel::{HostKernel, ParallelStrategy};
use crate::task::{SearchResult, Task, WorkerKind};

use std::sync::atomic::{AtomicBool, AtomicU64};
use std::time::Instant;
use tracing::{info, warn};

/// Which search backend to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Engine {
    /// OpenCL if a device is present, otherwise sequential CPU
    #[default]
    Auto,
    /// OpenCL only (fails without a device)
    Gpu,
    /// Batched pipeline on host threads
    Threads,
    /// Sequential CPU search
    Cpu,
}

/// Build the search strategy for `engine`.
pub fn select_strategy(engine: Engine, config: &SearchConfig) -> MinerResult<Box<dyn SearchStrategy>> {
    match engine {
        Engine::Cpu => Ok(Box::new(SequentialStrategy::new(config))),
        Engine::Threads => {
            let kernel = HostKernel::new(config.threads)?;
            Ok(Box::new(ParallelStrategy::new(kernel, config)))
        }
        Engine::Gpu => gpu_strategy(config),
        Engine::Auto => match gpu_strategy(config) {
            Ok(strategy) => Ok(strategy),
            Err(e) => {
                info!("GPU unavailable ({}), using CPU search", e);
                Ok(Box::new(SequentialStrategy::new(config)))
            }
        },
    }
}

#[cfg(feature = "gpu")]
fn gpu_strategy(config: &SearchConfig) -> MinerResult<Box<dyn SearchStrategy>> {
    use crate::mining::gpu::{OclKernel, probe};

    let device = probe().ok_or_else(|| MinerError::GpuUnavailable("no OpenCL device".into()))?;
    info!(%device, "OpenCL device found");
    let kernel = OclKernel::new(config.batch_size, config.slot_width)?;
    Ok(Box::new(ParallelStrategy::new(kernel, config)))
}

#[cfg(not(feature = "gpu"))]
fn gpu_strategy(_config: &SearchConfig) -> MinerResult<Box<dyn SearchStrategy>> {
    Err(MinerError::GpuUnavailable(
        "built without the `gpu` feature".into(),
    ))
}

/// Runs searches and turns their outcomes into [`SearchResult`]s.
pub struct Miner {
    strategy: Box<dyn SearchStrategy>,
    fallback: SequentialStrategy,
    config: SearchConfig,
    user_id: String,
    kind: WorkerKind,
}

impl Miner {
    pub fn new(
        engine: Engine,
        config: SearchConfig,
        user_id: impl Into<String>,
        kind: WorkerKind,
    ) -> MinerResult<Self> {
        let strategy = select_strategy(engine, &config)?;
        Ok(Self::with_strategy(strategy, config, user_id, kind))
    }

    pub fn with_strategy(
        strategy: Box<dyn SearchStrategy>,
        config: SearchConfig,
        user_id: impl Into<String>,
        kind: WorkerKind,
    ) -> Self {
        Self {
            fallback: SequentialStrategy::new(&config),
            strategy,
            config,
            user_id: user_id.into(),
            kind,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    /// Search `task` until a match, the deadline, or cancellation.
    ///
    /// Returns `Ok(None)` when cancelled; cancelled searches are not reported.
    pub fn solve(
        &self,
        task: &Task,
        total_attempts: &AtomicU64,
        cancel: &AtomicBool,
    ) -> MinerResult<Option<SearchResult>> {
        task.validate()?;
        let target = task.target()?;
        let start = Instant::now();
        let deadline = start + self.config.timeout;

        let outcome = match self
            .strategy
            .search(task, &target, deadline, total_attempts, cancel)
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(strategy = self.strategy.name(), "Search failed ({}), retrying on CPU", e);
                self.fallback
                    .search(task, &target, deadline, total_attempts, cancel)?
            }
        };
        let processing_time = start.elapsed().as_secs_f64();

        let (hash, number, timeout) = match outcome {
            SearchOutcome::Found { number, hash, attempts } => {
                info!(number, hash = %to_hex(hash), attempts, processing_time, "Solution found");
                (to_hex(hash), number.to_string(), false)
            }
            SearchOutcome::TimedOut { attempts } | SearchOutcome::Exhausted { attempts } => {
                info!(attempts, processing_time, "No solution before cutoff");
                (String::new(), String::new(), true)
            }
            SearchOutcome::Cancelled { attempts } => {
                info!(attempts, "Search cancelled");
                return Ok(None);
            }
        };

        let mut task = task.clone();
        task.strip_result_fields();
        let result = SearchResult {
            task,
            hash,
            number,
            processing_time,
            user_id: self.user_id.clone(),
            timeout,
            worker_user: self.kind.is_user(),
            worker_type: self.kind,
        };

        if !result.verify() {
            return Err(MinerError::BadSolution(format!(
                "{} produced {} for number {}",
                self.strategy.name(),
                result.hash,
                result.number
            )));
        }
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::config::SequentialMode;
    use crate::target::TargetChecker;
    use std::time::Duration;

    /// Always errors, to exercise the CPU retry.
    struct BrokenStrategy;

    impl SearchStrategy for BrokenStrategy {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn search(
            &self,
            _task: &Task,
            _target: &TargetChecker,
            _deadline: Instant,
            _total_attempts: &AtomicU64,
            _cancel: &AtomicBool,
        ) -> MinerResult<SearchOutcome> {
            Err(MinerError::GpuUnavailable("device lost".into()))
        }
    }

    /// Claims a bogus match.
    struct LyingStrategy;

    impl SearchStrategy for LyingStrategy {
        fn name(&self) -> &'static str {
            "lying"
        }

        fn search(
            &self,
            task: &Task,
            _target: &TargetChecker,
            _deadline: Instant,
            _total_attempts: &AtomicU64,
            _cancel: &AtomicBool,
        ) -> MinerResult<SearchOutcome> {
            Ok(SearchOutcome::Found {
                number: task.random_end + 1,
                hash: 0,
                attempts: 1,
            })
        }
    }

    fn config() -> SearchConfig {
        SearchConfig::new(2)
            .with_timeout(Duration::from_secs(5))
            .with_batch_size(512)
    }

    fn solve(miner: &Miner, task: &Task) -> Option<SearchResult> {
        miner
            .solve(task, &AtomicU64::new(0), &AtomicBool::new(false))
            .unwrap()
    }

    fn check(result: &SearchResult, task: &Task) {
        assert!(result.verify());
        if result.timeout {
            assert!(result.hash.is_empty() && result.number.is_empty());
        } else {
            assert!(result.hash.starts_with(&task.prefix));
            let n: u64 = result.number.parse().unwrap();
            assert!(n >= task.random_start && n <= task.random_end);
        }
    }

    #[test]
    fn test_every_bounded_strategy_terminates() {
        let task = Task::new(0, 99, "a", "b", "0");
        for engine in [Engine::Cpu, Engine::Threads, Engine::Auto] {
            let miner = Miner::new(engine, config(), "user-1", WorkerKind::Cpu).unwrap();
            let result = solve(&miner, &task).unwrap();
            check(&result, &task);
            assert_eq!(result.user_id, "user-1");
            assert_eq!(result.worker_type, WorkerKind::Cpu);
            assert!(!result.worker_user);
        }

        let scan = Miner::new(
            Engine::Cpu,
            config().with_mode(SequentialMode::Scan),
            "user-1",
            WorkerKind::User,
        )
        .unwrap();
        let result = solve(&scan, &task).unwrap();
        check(&result, &task);
        assert!(result.worker_user);
    }

    #[test]
    fn test_cutoff_yields_timeout_result() {
        let hash = crate::hash::hex_digest("7ab");
        let other = if hash.starts_with('f') { "0" } else { "f" };
        let task = Task::new(7, 7, "a", "b", other);
        let miner = Miner::new(
            Engine::Cpu,
            config().with_timeout(Duration::from_millis(30)),
            "u",
            WorkerKind::Cpu,
        )
        .unwrap();
        let result = solve(&miner, &task).unwrap();
        assert!(result.timeout);
        assert!(result.hash.is_empty());
        assert!(result.number.is_empty());
        assert!(result.processing_time >= 0.03);
    }

    #[test]
    fn test_exhausted_scan_reports_timeout() {
        let hash = crate::hash::hex_digest("7ab");
        let other = if hash.starts_with('f') { "0" } else { "f" };
        let task = Task::new(7, 7, "a", "b", other);
        let miner = Miner::new(
            Engine::Cpu,
            config().with_mode(SequentialMode::Scan),
            "u",
            WorkerKind::Cpu,
        )
        .unwrap();
        let attempts = AtomicU64::new(0);
        let result = miner
            .solve(&task, &attempts, &AtomicBool::new(false))
            .unwrap()
            .unwrap();
        assert!(result.timeout);
        assert!(result.hash.is_empty());
        assert!(result.number.is_empty());
        assert!(result.verify());
        // Gave up after the one candidate, well before the cutoff.
        assert_eq!(attempts.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert!(result.processing_time < 5.0);
    }

    #[test]
    fn test_cancelled_search_is_not_reported() {
        let task = Task::new(0, 99, "a", "b", "ffffffff");
        let miner = Miner::new(Engine::Cpu, config(), "u", WorkerKind::Cpu).unwrap();
        let result = miner
            .solve(&task, &AtomicU64::new(0), &AtomicBool::new(true))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_failed_strategy_falls_back_to_cpu() {
        let task = Task::new(0, 99, "a", "b", "");
        let miner = Miner::with_strategy(Box::new(BrokenStrategy), config(), "u", WorkerKind::Cpu);
        let result = solve(&miner, &task).unwrap();
        assert!(!result.timeout);
        check(&result, &task);
    }

    #[test]
    fn test_bad_solution_is_rejected() {
        let task = Task::new(0, 99, "a", "b", "");
        let miner = Miner::with_strategy(Box::new(LyingStrategy), config(), "u", WorkerKind::Cpu);
        let err = miner
            .solve(&task, &AtomicU64::new(0), &AtomicBool::new(false))
            .unwrap_err();
        assert!(matches!(err, MinerError::BadSolution(_)));
    }

    #[test]
    fn test_invalid_task_is_an_error() {
        let task = Task::new(10, 1, "a", "b", "0");
        let miner = Miner::new(Engine::Cpu, config(), "u", WorkerKind::Cpu).unwrap();
        assert!(miner
            .solve(&task, &AtomicU64::new(0), &AtomicBool::new(false))
            .is_err());
    }

    #[cfg(not(feature = "gpu"))]
    #[test]
    fn test_gpu_engine_requires_feature() {
        assert!(matches!(
            select_strategy(Engine::Gpu, &config()),
            Err(MinerError::GpuUnavailable(_))
        ));
        assert_eq!(
            select_strategy(Engine::Auto, &config()).unwrap().name(),
            "cpu-random"
        );
    }
}
