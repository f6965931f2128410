use thiserror::Error;

#[derive(Error, Debug)]
pub enum MinerError {
    #[error("invalid prefix `{0}`: {1}")]
    InvalidPrefix(String, &'static str),

    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] envy::Error),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("key store error: {0}")]
    KeyStore(String),

    #[error("no key for user `{0}`")]
    KeyNotFound(String),

    #[error("unexpected status {status} from {url}: {body}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
        body: String,
    },

    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("solution failed verification: {0}")]
    BadSolution(String),

    #[error("gpu unavailable: {0}")]
    GpuUnavailable(String),

    #[cfg(feature = "gpu")]
    #[error("opencl error: {0}")]
    OpenCl(#[from] ocl::Error),
}

pub type MinerResult<T> = Result<T, MinerError>;
