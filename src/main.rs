use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use unlucoin_miner::keystore::default_key_dir;
use unlucoin_miner::logging::init_log;
use unlucoin_miner::mining::{HostKernel, ParallelStrategy, SequentialMode, SequentialStrategy};
use unlucoin_miner::progress::{SearchProgress, format_duration, format_hashrate, format_number};
use unlucoin_miner::{
    Coordinator, Endpoints, Engine, FileKeyStore, KeyStore, LedgerClient, Metrics, Miner, PoolClient,
    SearchConfig, SearchOutcome, SearchStrategy, Task, TargetChecker, Worker, WorkerConfig,
    WorkerEvent, WorkerKind, hex_digest,
};

#[derive(Parser, Debug)]
#[command(name = "unlucoin-miner")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Websocket endpoint that pushes tasks [env: UNLUCOIN_SOCKET_URL, default: ws://localhost:8888]
    #[arg(long, global = true)]
    socket_url: Option<String>,

    /// Coordinator base URL for results, metrics and ledger [env: UNLUCOIN_COORDINATOR_URL]
    #[arg(long, global = true)]
    coordinator_url: Option<String>,

    /// Pool manager base URL for keep-alive [env: UNLUCOIN_POOL_MANAGER_URL]
    #[arg(long, global = true)]
    pool_manager_url: Option<String>,
}

impl Args {
    /// Environment (and `.env`) first, flags on top.
    fn endpoints(&self) -> Result<Endpoints> {
        let mut endpoints = Endpoints::from_env().context("Invalid UNLUCOIN_* environment")?;
        if let Some(url) = &self.socket_url {
            endpoints.socket_url = url.clone();
        }
        if let Some(url) = &self.coordinator_url {
            endpoints.coordinator_url = url.clone();
        }
        if let Some(url) = &self.pool_manager_url {
            endpoints.pool_manager_url = url.clone();
        }
        Ok(endpoints.normalized())
    }
}

#[derive(clap::Args, Debug, Clone)]
struct SearchOpts {
    /// Search backend
    #[arg(short, long, value_enum, default_value_t = Engine::Auto)]
    engine: Engine,

    /// Number of CPU threads for the threads engine (default: all cores)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Give up on a task after this many seconds
    #[arg(long, default_value = "1200")]
    timeout_secs: u64,

    /// How the CPU engine walks the range
    #[arg(long, value_enum, default_value_t = SequentialMode::Random)]
    mode: SequentialMode,
}

impl SearchOpts {
    fn config(&self) -> SearchConfig {
        SearchConfig::new(self.threads.unwrap_or(0))
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_mode(self.mode)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to the pool and mine tasks until Ctrl+C
    Worker {
        /// User credited with results
        #[arg(short, long, env = "UNLUCOIN_USER_ID", default_value = "anonymous")]
        user_id: String,

        /// Report as a human-operated worker
        #[arg(long)]
        user: bool,

        /// Seconds between keep-alive pings
        #[arg(long, default_value = "10")]
        keep_alive_secs: u64,

        #[command(flatten)]
        search: SearchOpts,
    },
    /// Run a single local search and print the result
    Search {
        #[arg(long, default_value = "0")]
        start: u64,

        #[arg(long)]
        end: u64,

        /// base_string_chain
        #[arg(long, default_value = "")]
        base: String,

        /// blockchain_content
        #[arg(long, default_value = "")]
        content: String,

        /// Hex prefix the hash must start with
        #[arg(short, long)]
        prefix: String,

        #[arg(short, long, env = "UNLUCOIN_USER_ID", default_value = "anonymous")]
        user_id: String,

        #[command(flatten)]
        search: SearchOpts,
    },
    /// Print the enhanced hash of a string
    Hash { input: String },
    /// Measure hash rate of each available backend
    Bench {
        /// Seconds per backend
        #[arg(long, default_value = "3")]
        seconds: u64,

        #[arg(short, long)]
        threads: Option<usize>,
    },
    /// Show pool metrics per prefix and worker type
    Metrics,
    /// Show a user's balance
    Balance { user_id: String },
    /// Create a signing key for a user
    Keygen {
        user_id: String,

        /// Upload the public key to the ledger
        #[arg(long)]
        register: bool,

        #[arg(long, env = "UNLUCOIN_KEY_DIR")]
        key_dir: Option<PathBuf>,
    },
    /// Send funds to another user
    Transfer {
        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,

        #[arg(long)]
        amount: f64,

        #[arg(long, env = "UNLUCOIN_KEY_DIR")]
        key_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Before parsing so `.env` values reach clap's `env` lookups.
    dotenv::dotenv().ok();
    let args = Args::parse();
    let endpoints = args.endpoints()?;

    match args.command {
        Some(Commands::Worker {
            user_id,
            user,
            keep_alive_secs,
            search,
        }) => {
            init_log();
            let kind = if user { WorkerKind::User } else { WorkerKind::Cpu };
            run_worker(endpoints, user_id, kind, keep_alive_secs, search).await
        }
        Some(Commands::Search {
            start,
            end,
            base,
            content,
            prefix,
            user_id,
            search,
        }) => {
            let task = Task::new(start, end, base, content, prefix);
            run_search(task, user_id, search)
        }
        Some(Commands::Hash { input }) => {
            println!("{}", hex_digest(&input));
            Ok(())
        }
        Some(Commands::Bench { seconds, threads }) => {
            run_bench(Duration::from_secs(seconds), threads.unwrap_or(0))
        }
        Some(Commands::Metrics) => show_metrics(&endpoints).await,
        Some(Commands::Balance { user_id }) => {
            let ledger = LedgerClient::new(endpoints.coordinator_url, FileKeyStore::new(default_key_dir()));
            let balance = ledger.balance(&user_id).await.context("Failed to fetch balance")?;
            println!("💰 {}: {}", user_id, style(balance).bold());
            Ok(())
        }
        Some(Commands::Keygen {
            user_id,
            register,
            key_dir,
        }) => {
            let keys = FileKeyStore::new(key_dir.unwrap_or_else(default_key_dir));
            if register {
                let ledger = LedgerClient::new(endpoints.coordinator_url, keys);
                let public_key = ledger.register_key(&user_id).await?;
                println!("🔑 Registered key for {}: {}", user_id, public_key);
            } else {
                let public_key = keys.generate(&user_id)?;
                println!("🔑 Public key for {}: {}", user_id, public_key);
                println!("   Stored in {}", keys.dir().display());
            }
            Ok(())
        }
        Some(Commands::Transfer {
            from,
            to,
            amount,
            key_dir,
        }) => {
            init_log();
            let keys = FileKeyStore::new(key_dir.unwrap_or_else(default_key_dir));
            let ledger = LedgerClient::new(endpoints.coordinator_url, keys);
            let response = ledger
                .transfer(&from, &to, amount)
                .await
                .context("Transfer failed")?;
            println!("✅ Sent {} from {} to {}: {}", amount, from, to, response);
            Ok(())
        }
        None => {
            use clap::CommandFactory;
            Args::command().print_help()?;
            Ok(())
        }
    }
}

async fn run_worker(
    endpoints: Endpoints,
    user_id: String,
    kind: WorkerKind,
    keep_alive_secs: u64,
    search: SearchOpts,
) -> Result<()> {
    let miner = Miner::new(search.engine, search.config(), user_id.clone(), kind)
        .context("Failed to initialize miner")?;

    println!("🚀 UnluCoin Miner");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("👤 User:     {} ({})", user_id, kind);
    println!("⚙️  Engine:   {}", miner.strategy_name());
    println!("🔌 Tasks:    {}", endpoints.socket_url);
    println!("📮 Results:  {}", endpoints.coordinator_url);
    println!("💓 Liveness: {}", endpoints.pool_manager_url);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let client = PoolClient::new(&endpoints);
    let config = WorkerConfig::new(endpoints)
        .with_keep_alive(Duration::from_secs(keep_alive_secs.max(1)));
    let (worker, mut events) = Worker::new(config, miner, client);
    println!("🆔 Worker:   {}", worker.worker_id());
    worker.start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\n⛔ Stopping worker");
                worker.stop();
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                let done = matches!(event, WorkerEvent::Disconnected { .. });
                print_event(&event);
                if done {
                    break;
                }
            }
        }
    }

    println!(
        "🔢 Total attempts: {}",
        format_number(worker.total_attempts())
    );
    Ok(())
}

fn print_event(event: &WorkerEvent) {
    match event {
        WorkerEvent::Connected => println!("{}", style("✅ Connected, waiting for tasks").green()),
        WorkerEvent::TaskReceived {
            prefix,
            random_start,
            random_end,
        } => println!(
            "📥 Task: prefix '{}' in [{}, {}]",
            style(prefix).cyan(),
            random_start,
            random_end
        ),
        WorkerEvent::TaskRejected { reason } => {
            println!("{}", style(format!("⚠️  Ignored message: {}", reason)).yellow())
        }
        WorkerEvent::ResultSubmitted {
            timeout: true,
            response,
            ..
        } => println!("⌛ Timed out, reported ({})", response),
        WorkerEvent::ResultSubmitted {
            number,
            hash,
            response,
            ..
        } => println!(
            "{} {} -> {} ({})",
            style("🎉 Solved").green().bold(),
            number,
            hash,
            response
        ),
        WorkerEvent::SubmitFailed { error } => {
            println!("{}", style(format!("❌ Submit failed: {}", error)).red())
        }
        WorkerEvent::SearchFailed { error } => {
            println!("{}", style(format!("❌ Search failed: {}", error)).red())
        }
        WorkerEvent::KeepAliveFailed { error } => {
            println!("{}", style(format!("⚠️  Keep-alive failed: {}", error)).yellow())
        }
        WorkerEvent::Disconnected { reason: Some(reason) } => {
            println!("{}", style(format!("📴 Disconnected: {}", reason)).red())
        }
        WorkerEvent::Disconnected { reason: None } => println!("📴 Disconnected"),
    }
}

fn run_search(task: Task, user_id: String, search: SearchOpts) -> Result<()> {
    task.validate().context("Invalid task")?;
    let target = TargetChecker::from_hex_prefix(&task.prefix).context("Failed to parse prefix")?;
    let config = search.config();

    println!("🚀 UnluCoin Search");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("🎯 Target prefix: {}", task.prefix);
    println!(
        "📊 Difficulty: {} hex chars (~{} attempts avg)",
        target.difficulty(),
        format_number(target.estimated_attempts())
    );
    println!("🔢 Range: [{}, {}]", task.random_start, task.random_end);
    println!("⏱️  Cutoff: {}", format_duration(config.timeout));

    let miner = Miner::new(search.engine, config.clone(), user_id, WorkerKind::User)
        .context("Failed to initialize miner")?;
    println!("⚙️  Engine: {}", miner.strategy_name());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let total_attempts = Arc::new(AtomicU64::new(0));
    let cancel = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));

    let cancel_clone = cancel.clone();
    ctrlc::set_handler(move || {
        println!("\n⛔ Cancelled by user");
        cancel_clone.store(true, Ordering::SeqCst);
    })
    .ok();

    let progress = SearchProgress::new(&task.prefix, target.estimated_attempts(), config.timeout);
    let progress_handle = {
        let finished = finished.clone();
        let total_attempts = total_attempts.clone();
        thread::spawn(move || {
            while !finished.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(100));
                progress.tick(total_attempts.load(Ordering::Relaxed));
            }
            progress
        })
    };

    let result = miner.solve(&task, &total_attempts, &cancel);

    finished.store(true, Ordering::SeqCst);
    let progress = progress_handle
        .join()
        .map_err(|_| anyhow::anyhow!("progress thread panicked"))?;
    let attempts = total_attempts.load(Ordering::Relaxed);

    match result? {
        Some(result) if result.is_solved() => {
            progress.found(attempts);
            println!();
            println!("🎉 Number: {}", style(&result.number).green().bold());
            println!("🔑 Hash:   {}", result.hash);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Some(result) => {
            progress.abandon("⌛ No match before the cutoff");
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        None => progress.abandon("❌ Search cancelled"),
    }

    Ok(())
}

fn run_bench(duration: Duration, threads: usize) -> Result<()> {
    let config = SearchConfig::new(threads);
    let mut strategies: Vec<Box<dyn SearchStrategy>> = vec![
        Box::new(SequentialStrategy::new(&config)),
        Box::new(ParallelStrategy::new(HostKernel::new(config.threads)?, &config)),
    ];
    match unlucoin_miner::mining::select_strategy(Engine::Gpu, &config) {
        Ok(gpu) => strategies.push(gpu),
        Err(e) => println!("{}", style(format!("GPU skipped: {}", e)).dim()),
    }

    // Full-width prefix: a hit is a 1 in 2^32 event, so each run lasts the whole slot.
    let task = Task::new(0, u64::MAX / 2, "unlucoin", "benchmark-block", "00000000");
    let target = task.target()?;

    println!("⏱️  Benchmark ({} per backend, {} threads)", format_duration(duration), config.threads);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for strategy in &strategies {
        let attempts = AtomicU64::new(0);
        let cancel = AtomicBool::new(false);
        let start = Instant::now();
        let outcome = strategy.search(&task, &target, start + duration, &attempts, &cancel)?;
        let elapsed = start.elapsed().as_secs_f64();
        let hashes = outcome.attempts();
        println!(
            "{:<12} {:>14} {:>12} hashes",
            strategy.name(),
            format_hashrate(hashes as f64 / elapsed),
            format_number(hashes)
        );
        if let SearchOutcome::Found { number, .. } = outcome {
            println!("             (lucky hit on {})", number);
        }
    }
    Ok(())
}

async fn show_metrics(endpoints: &Endpoints) -> Result<()> {
    let client = PoolClient::new(endpoints);
    let metrics = client.metrics().await.context("Failed to fetch metrics")?;

    if metrics.data.is_empty() {
        println!("No metrics yet.");
        return Ok(());
    }

    println!(
        "{:<10} {:<12} {:>8} {:>10}",
        style("prefix").bold(),
        style("worker").bold(),
        style("solved").bold(),
        style("avg secs").bold()
    );
    for row in metrics_rows(&metrics) {
        println!("{}", row);
    }
    Ok(())
}

/// One line per prefix and worker type. `processing_time` is already an average.
fn metrics_rows(metrics: &Metrics) -> Vec<String> {
    metrics
        .data
        .iter()
        .flat_map(|(prefix, workers)| {
            workers.iter().map(move |(worker, stats)| {
                format!(
                    "{:<10} {:<12} {:>8} {:>10.2}",
                    prefix, worker, stats.cant, stats.processing_time
                )
            })
        })
        .collect()
}
