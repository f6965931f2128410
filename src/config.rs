use std::time::Duration;

use serde::Deserialize;

use crate::error::MinerResult;

/// Environment variable prefix, e.g. `UNLUCOIN_COORDINATOR_URL`.
pub const ENV_PREFIX: &str = "UNLUCOIN_";

pub const DEFAULT_SOCKET_URL: &str = "ws://localhost:8888";
pub const DEFAULT_COORDINATOR_URL: &str = "http://localhost:8090";
pub const DEFAULT_POOL_MANAGER_URL: &str = "http://localhost:8092";
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(10);

fn default_socket_url() -> String {
    DEFAULT_SOCKET_URL.to_string()
}

fn default_coordinator_url() -> String {
    DEFAULT_COORDINATOR_URL.to_string()
}

fn default_pool_manager_url() -> String {
    DEFAULT_POOL_MANAGER_URL.to_string()
}

/// Where the worker connects to. The coordinator also serves the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Endpoints {
    #[serde(default = "default_socket_url")]
    pub socket_url: String,
    #[serde(default = "default_coordinator_url")]
    pub coordinator_url: String,
    #[serde(default = "default_pool_manager_url")]
    pub pool_manager_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            socket_url: default_socket_url(),
            coordinator_url: default_coordinator_url(),
            pool_manager_url: default_pool_manager_url(),
        }
    }
}

impl Endpoints {
    /// Load from `UNLUCOIN_*` variables, reading `.env` first if present.
    pub fn from_env() -> MinerResult<Self> {
        dotenv::dotenv().ok();
        Ok(envy::prefixed(ENV_PREFIX).from_env()?)
    }

    pub fn from_iter<I>(vars: I) -> MinerResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::prefixed(ENV_PREFIX).from_iter(vars)?)
    }

    /// Drop trailing slashes so paths can be appended with `format!`.
    pub fn normalized(mut self) -> Self {
        for url in [
            &mut self.socket_url,
            &mut self.coordinator_url,
            &mut self.pool_manager_url,
        ] {
            while url.ends_with('/') {
                url.pop();
            }
        }
        self
    }
}

/// Connection settings for a [`Worker`](crate::worker::Worker). Who the
/// worker mines for comes from its [`Miner`](crate::mining::Miner).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub endpoints: Endpoints,
    pub keep_alive_interval: Duration,
}

impl WorkerConfig {
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            endpoints: endpoints.normalized(),
            keep_alive_interval: DEFAULT_KEEP_ALIVE,
        }
    }

    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }
}
