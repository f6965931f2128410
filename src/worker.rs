//! Mining worker: websocket task feed, search dispatch, and liveness pings.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::client::Coordinator;
use crate::config::WorkerConfig;
use crate::error::MinerResult;
use crate::mining::Miner;
use crate::task::{KeepAlive, SearchResult, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Things the worker reports to whoever is driving it.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Connected,
    TaskReceived {
        prefix: String,
        random_start: u64,
        random_end: u64,
    },
    TaskRejected {
        reason: String,
    },
    ResultSubmitted {
        timeout: bool,
        number: String,
        hash: String,
        response: String,
    },
    SubmitFailed {
        error: String,
    },
    SearchFailed {
        error: String,
    },
    KeepAliveFailed {
        error: String,
    },
    /// `reason` is `None` after [`Worker::stop`].
    Disconnected {
        reason: Option<String>,
    },
}

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `worker-` plus a random base-36 suffix.
pub fn generate_worker_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("worker-{suffix}")
}

struct Session {
    generation: u64,
    shutdown: watch::Sender<bool>,
    cancel: Arc<AtomicBool>,
    keep_alive: Option<JoinHandle<()>>,
}

impl Session {
    fn close(self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(handle) = self.keep_alive {
            handle.abort();
        }
        let _ = self.shutdown.send(true);
    }
}

struct Shared<C> {
    config: WorkerConfig,
    worker_id: String,
    miner: Arc<Miner>,
    coordinator: Arc<C>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    total_attempts: Arc<AtomicU64>,
    generation: AtomicU64,
    // Lock order: state, then session.
    state: Mutex<ConnectionState>,
    session: Mutex<Option<Session>>,
}

/// A single-connection mining worker.
///
/// `start` and `stop` must be called from within a tokio runtime.
pub struct Worker<C: Coordinator> {
    shared: Arc<Shared<C>>,
}

impl<C: Coordinator> Worker<C> {
    pub fn new(
        config: WorkerConfig,
        miner: Miner,
        coordinator: C,
    ) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Shared {
            config,
            worker_id: generate_worker_id(),
            miner: Arc::new(miner),
            coordinator: Arc::new(coordinator),
            events,
            total_attempts: Arc::new(AtomicU64::new(0)),
            generation: AtomicU64::new(0),
            state: Mutex::new(ConnectionState::Disconnected),
            session: Mutex::new(None),
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            rx,
        )
    }

    pub fn worker_id(&self) -> &str {
        &self.shared.worker_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Hashes computed across all tasks so far.
    pub fn total_attempts(&self) -> u64 {
        self.shared.total_attempts.load(Ordering::Relaxed)
    }

    /// Open the task connection. Returns `false` if already connecting or connected.
    pub fn start(&self) -> bool {
        let mut state = self.shared.state.lock();
        if *state != ConnectionState::Disconnected {
            return false;
        }
        *state = ConnectionState::Connecting;

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let cancel = Arc::new(AtomicBool::new(false));

        info!(
            worker_id = %self.shared.worker_id,
            url = %self.shared.config.endpoints.socket_url,
            strategy = self.shared.miner.strategy_name(),
            "Connecting"
        );
        tokio::spawn(run_connection(
            self.shared.clone(),
            generation,
            shutdown_rx,
            cancel.clone(),
        ));

        // The connection task takes `state` before touching the session, so
        // it cannot observe the gap between spawn and insert.
        *self.shared.session.lock() = Some(Session {
            generation,
            shutdown,
            cancel,
            keep_alive: None,
        });
        true
    }

    /// Close the connection, stop liveness pings, and cancel any search in flight.
    pub fn stop(&self) {
        let session = {
            let mut state = self.shared.state.lock();
            *state = ConnectionState::Disconnected;
            self.shared.session.lock().take()
        };
        if let Some(session) = session {
            info!(worker_id = %self.shared.worker_id, "Stopping worker");
            session.close();
            self.shared.emit(WorkerEvent::Disconnected { reason: None });
        }
    }
}

impl<C: Coordinator> Drop for Worker<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<C: Coordinator> Shared<C> {
    fn emit(&self, event: WorkerEvent) {
        // No receiver just means nobody is listening.
        let _ = self.events.send(event);
    }

    /// Promote the session to `Connected` and start pinging. False if superseded.
    fn mark_connected(self: &Arc<Self>, generation: u64) -> bool {
        let mut state = self.state.lock();
        let mut session = self.session.lock();
        match session.as_mut() {
            Some(s) if s.generation == generation => {
                *state = ConnectionState::Connected;
                s.keep_alive = Some(self.spawn_keep_alive());
                true
            }
            _ => false,
        }
    }

    /// Tear down after the connection ended on its own.
    fn finish(&self, generation: u64, reason: String) {
        let session = {
            let mut state = self.state.lock();
            let mut session = self.session.lock();
            if !matches!(session.as_ref(), Some(s) if s.generation == generation) {
                return;
            }
            *state = ConnectionState::Disconnected;
            session.take()
        };
        if let Some(session) = session {
            session.close();
        }
        self.emit(WorkerEvent::Disconnected {
            reason: Some(reason),
        });
    }

    fn spawn_keep_alive(self: &Arc<Self>) -> JoinHandle<()> {
        let shared = self.clone();
        let period = self.config.keep_alive_interval;
        tokio::spawn(async move {
            let ping = KeepAlive {
                worker_id: shared.worker_id.clone(),
                worker_user: shared.miner.kind().is_user(),
                worker_type: shared.miner.kind(),
            };
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match shared.coordinator.keep_alive(&ping).await {
                    Ok(()) => debug!(worker_id = %ping.worker_id, "keep-alive sent"),
                    Err(e) => {
                        warn!("Keep-alive failed: {}", e);
                        shared.emit(WorkerEvent::KeepAliveFailed {
                            error: e.to_string(),
                        });
                    }
                }
            }
        })
    }

    /// Parse one inbound message; `None` if it isn't a valid task.
    fn accept_task(&self, text: &str) -> Option<Task> {
        let task = match Task::from_json(text) {
            Ok(task) => task,
            Err(e) => {
                warn!("Rejected task: {}", e);
                self.emit(WorkerEvent::TaskRejected {
                    reason: e.to_string(),
                });
                return None;
            }
        };

        info!(
            prefix = %task.prefix,
            start = task.random_start,
            end = task.random_end,
            "Task received"
        );
        self.emit(WorkerEvent::TaskReceived {
            prefix: task.prefix.clone(),
            random_start: task.random_start,
            random_end: task.random_end,
        });
        Some(task)
    }

    /// Run the search off the runtime so the socket keeps being read.
    fn spawn_search(&self, task: Task, cancel: &Arc<AtomicBool>) -> SearchHandle {
        let miner = self.miner.clone();
        let attempts = self.total_attempts.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || miner.solve(&task, &attempts, &cancel))
    }

    fn settle(self: &Arc<Self>, solved: Result<MinerResult<Option<SearchResult>>, JoinError>) {
        match solved {
            Ok(Ok(Some(result))) => self.report(result),
            Ok(Ok(None)) => debug!("Search cancelled, nothing to report"),
            Ok(Err(e)) => {
                error!("Search failed: {}", e);
                self.emit(WorkerEvent::SearchFailed {
                    error: e.to_string(),
                });
            }
            Err(e) => {
                error!("Search task panicked: {}", e);
                self.emit(WorkerEvent::SearchFailed {
                    error: e.to_string(),
                });
            }
        }
    }

    /// Submit in the background so the next task isn't held up.
    fn report(self: &Arc<Self>, result: SearchResult) {
        let shared = self.clone();
        tokio::spawn(async move {
            match shared.coordinator.submit_result(&result).await {
                Ok(response) => {
                    info!(timeout = result.timeout, number = %result.number, "Result submitted: {}", response);
                    shared.emit(WorkerEvent::ResultSubmitted {
                        timeout: result.timeout,
                        number: result.number,
                        hash: result.hash,
                        response,
                    });
                }
                Err(e) => {
                    warn!("Submitting result failed: {}", e);
                    shared.emit(WorkerEvent::SubmitFailed {
                        error: e.to_string(),
                    });
                }
            }
        });
    }
}

type SearchHandle = JoinHandle<MinerResult<Option<SearchResult>>>;

async fn join_search(
    search: &mut Option<SearchHandle>,
) -> Result<MinerResult<Option<SearchResult>>, JoinError> {
    match search {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn run_connection<C: Coordinator>(
    shared: Arc<Shared<C>>,
    generation: u64,
    mut shutdown: watch::Receiver<bool>,
    cancel: Arc<AtomicBool>,
) {
    let url = shared.config.endpoints.socket_url.clone();

    let ws = tokio::select! {
        connected = tokio_tungstenite::connect_async(url.as_str()) => match connected {
            Ok((ws, _)) => ws,
            Err(e) => {
                warn!(%url, "Connection failed: {}", e);
                shared.finish(generation, e.to_string());
                return;
            }
        },
        _ = shutdown.changed() => return,
    };

    if !shared.mark_connected(generation) {
        return;
    }
    info!(%url, "Connected");
    shared.emit(WorkerEvent::Connected);

    let (mut write, mut read) = ws.split();
    let mut search: Option<SearchHandle> = None;
    let mut pending: VecDeque<Task> = VecDeque::new();

    let reason = loop {
        let text = tokio::select! {
            _ = shutdown.changed() => {
                let _ = write.send(Message::Close(None)).await;
                let _ = write.close().await;
                return;
            }
            solved = join_search(&mut search), if search.is_some() => {
                search = None;
                shared.settle(solved);
                if let Some(task) = pending.pop_front() {
                    search = Some(shared.spawn_search(task, &cancel));
                }
                continue;
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Rejected binary message: {}", e);
                        shared.emit(WorkerEvent::TaskRejected { reason: e.to_string() });
                        continue;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) if !frame.reason.is_empty() => {
                            format!("closed by server: {}", frame.reason.as_str())
                        }
                        _ => "closed by server".to_string(),
                    };
                }
                // Pings are answered by tungstenite on the next read or write.
                Some(Ok(_)) => continue,
                Some(Err(e)) => break e.to_string(),
                None => break "connection closed".to_string(),
            }
        };

        let Some(task) = shared.accept_task(&text) else {
            continue;
        };
        if search.is_some() {
            debug!(queued = pending.len() + 1, "Search busy, task queued");
            pending.push_back(task);
        } else {
            search = Some(shared.spawn_search(task, &cancel));
        }
    };

    if !pending.is_empty() {
        warn!(dropped = pending.len(), "Connection lost with tasks still queued");
    }
    info!(%reason, "Disconnected");
    shared.finish(generation, reason);
}
