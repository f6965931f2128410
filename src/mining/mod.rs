//! Mining module - proof-of-work search
//!
//! This module separates:
//! - Search backends via the `SearchStrategy` trait (sequential, batched parallel)
//! - Batch hashing via the `HashKernel` trait (host threads, OpenCL)
//! - Result assembly and strategy selection via `Miner`

pub mod config;
pub mod executor;
pub mod miner;
pub mod parallel;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use config::{SearchConfig, SequentialMode};
pub use executor::{SearchOutcome, SearchStrategy, SequentialStrategy};
pub use miner::{Engine, Miner, select_strategy};
pub use parallel::{EncodedBatch, HashKernel, HostKernel, ParallelStrategy};

#[cfg(feature = "gpu")]
pub use gpu::OclKernel;
