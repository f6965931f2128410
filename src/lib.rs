// UnluCoin mining worker library
pub mod client;
pub mod config;
pub mod error;
pub mod hash;
pub mod keystore;
pub mod ledger;
pub mod logging;
pub mod mining;
pub mod progress;
pub mod target;
pub mod task;
pub mod worker;

#[cfg(test)]
mod test_support;

// Re-export for convenience
pub use client::{Coordinator, PoolClient};
pub use config::{Endpoints, WorkerConfig};
pub use error::{MinerError, MinerResult};
pub use hash::{enhanced_hash, hex_digest};
pub use keystore::{FileKeyStore, KeyStore, MemoryKeyStore};
pub use ledger::LedgerClient;
pub use mining::{Engine, Miner, SearchConfig, SearchOutcome, SearchStrategy};
pub use target::TargetChecker;
pub use task::{KeepAlive, Metrics, SearchResult, Task, WorkerKind};
pub use worker::{ConnectionState, Worker, WorkerEvent};
