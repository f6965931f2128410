//! Wire types exchanged with the pool coordinator and pool manager.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{MinerError, MinerResult};
use crate::target::TargetChecker;

/// Keys a [`SearchResult`] writes itself; a task's copies are dropped so the
/// result's values win.
const RESULT_FIELDS: [&str; 7] = [
    "hash",
    "number",
    "processing_time",
    "user_id",
    "timeout",
    "worker_user",
    "worker_type",
];

/// Unit of work pushed by the coordinator over the websocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub random_start: u64,
    pub random_end: u64,
    pub base_string_chain: String,
    pub blockchain_content: String,
    pub prefix: String,
    /// Fields we don't interpret, echoed back in the result.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    pub fn new(
        random_start: u64,
        random_end: u64,
        base_string_chain: impl Into<String>,
        blockchain_content: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            random_start,
            random_end,
            base_string_chain: base_string_chain.into(),
            blockchain_content: blockchain_content.into(),
            prefix: prefix.into(),
            extra: Map::new(),
        }
    }

    /// Parse an inbound websocket payload and validate it.
    pub fn from_json(text: &str) -> MinerResult<Self> {
        let mut task: Task = serde_json::from_str(text)?;
        task.validate()?;
        task.strip_result_fields();
        Ok(task)
    }

    pub(crate) fn strip_result_fields(&mut self) {
        self.extra
            .retain(|key, _| !RESULT_FIELDS.contains(&key.as_str()));
    }

    pub fn validate(&self) -> MinerResult<()> {
        if self.random_start > self.random_end {
            return Err(MinerError::InvalidTask(format!(
                "random_start {} is greater than random_end {}",
                self.random_start, self.random_end
            )));
        }
        TargetChecker::from_hex_prefix(&self.prefix)?;
        Ok(())
    }

    pub fn target(&self) -> MinerResult<TargetChecker> {
        TargetChecker::from_hex_prefix(&self.prefix)
    }

    /// Size of the search space; saturates for the full `u64` range.
    pub fn range_len(&self) -> u64 {
        (self.random_end - self.random_start).saturating_add(1)
    }
}

/// Who is behind a worker, as the pool manager buckets it in `/metrics`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerKind {
    /// A person running the worker by hand.
    #[serde(rename = "worker_user")]
    User,
    /// An unattended CPU/GPU worker.
    #[serde(rename = "worker_cpu")]
    Cpu,
}

impl WorkerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::User => "worker_user",
            WorkerKind::Cpu => "worker_cpu",
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, WorkerKind::User)
    }
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of processing a [`Task`], posted to `/solved_task`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub task: Task,
    /// Found hex digest, empty on timeout.
    pub hash: String,
    /// Winning candidate in decimal, empty on timeout.
    pub number: String,
    /// Elapsed seconds.
    pub processing_time: f64,
    pub user_id: String,
    pub timeout: bool,
    pub worker_user: bool,
    pub worker_type: WorkerKind,
}

impl SearchResult {
    pub fn is_solved(&self) -> bool {
        !self.timeout && !self.hash.is_empty()
    }

    /// Re-check a solved result against its task. Used before reporting.
    pub fn verify(&self) -> bool {
        if !self.is_solved() {
            return self.hash.is_empty() && self.number.is_empty();
        }
        let Ok(number) = self.number.parse::<u64>() else {
            return false;
        };
        if number < self.task.random_start || number > self.task.random_end {
            return false;
        }
        let input = format!(
            "{}{}{}",
            self.number, self.task.base_string_chain, self.task.blockchain_content
        );
        let hash = crate::hash::hex_digest(&input);
        hash == self.hash && hash.starts_with(&self.task.prefix)
    }
}

/// Liveness payload posted to `/keep_alive`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeepAlive {
    pub worker_id: String,
    pub worker_user: bool,
    pub worker_type: WorkerKind,
}

/// Per worker-type counters for one prefix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    #[serde(default)]
    pub cant: u64,
    /// Average seconds per solved task, as the pool manager reports it.
    #[serde(default)]
    pub processing_time: f64,
}

/// `GET /metrics` body: prefix -> worker type -> stats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default)]
    pub data: BTreeMap<String, BTreeMap<String, WorkerStats>>,
}

impl Metrics {
    pub fn stats(&self, prefix: &str, kind: WorkerKind) -> Option<&WorkerStats> {
        self.data.get(prefix)?.get(kind.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_task() {
        let task = Task::from_json(
            r#"{"random_start":0,"random_end":99,"base_string_chain":"a","blockchain_content":"b","prefix":"0"}"#,
        )
        .unwrap();
        assert_eq!(task, Task::new(0, 99, "a", "b", "0"));
        assert_eq!(task.range_len(), 100);
    }

    #[test]
    fn test_extra_fields_carried_into_result() {
        let task = Task::from_json(
            r#"{"random_start":1,"random_end":2,"base_string_chain":"a","blockchain_content":"b","prefix":"","id":7,"block":{"n":1}}"#,
        )
        .unwrap();
        assert_eq!(task.extra.get("id"), Some(&json!(7)));

        let result = SearchResult {
            task,
            hash: String::new(),
            number: String::new(),
            processing_time: 1.5,
            user_id: "u".into(),
            timeout: true,
            worker_user: false,
            worker_type: WorkerKind::Cpu,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["id"], json!(7));
        assert_eq!(value["block"], json!({"n": 1}));
        assert_eq!(value["random_start"], json!(1));
        assert_eq!(value["worker_type"], json!("worker_cpu"));
        assert_eq!(value["timeout"], json!(true));
    }

    #[test]
    fn test_stale_result_fields_do_not_duplicate() {
        let task = Task::from_json(
            r#"{"random_start":1,"random_end":2,"base_string_chain":"a","blockchain_content":"b","prefix":"","id":7,"hash":"stale","timeout":false,"user_id":"someone"}"#,
        )
        .unwrap();
        assert_eq!(task.extra.len(), 1);

        let result = SearchResult {
            task,
            hash: String::new(),
            number: String::new(),
            processing_time: 2.0,
            user_id: "me".into(),
            timeout: true,
            worker_user: false,
            worker_type: WorkerKind::Cpu,
        };
        let body = serde_json::to_string(&result).unwrap();
        assert_eq!(body.matches("\"hash\":").count(), 1);
        assert_eq!(body.matches("\"timeout\":").count(), 1);

        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["hash"], json!(""));
        assert_eq!(value["timeout"], json!(true));
        assert_eq!(value["user_id"], json!("me"));
        assert_eq!(value["id"], json!(7));
    }

    #[test]
    fn test_malformed_tasks_rejected() {
        assert!(Task::from_json("not json").is_err());
        assert!(Task::from_json(r#"{"random_start":0}"#).is_err());
        assert!(
            Task::from_json(
                r#"{"random_start":5,"random_end":1,"base_string_chain":"","blockchain_content":"","prefix":"0"}"#
            )
            .is_err()
        );
        assert!(
            Task::from_json(
                r#"{"random_start":0,"random_end":1,"base_string_chain":"","blockchain_content":"","prefix":"zz"}"#
            )
            .is_err()
        );
        assert!(
            Task::from_json(
                r#"{"random_start":-1,"random_end":1,"base_string_chain":"","blockchain_content":"","prefix":"0"}"#
            )
            .is_err()
        );
    }

    #[test]
    fn test_full_range_len_saturates() {
        assert_eq!(Task::new(0, u64::MAX, "", "", "").range_len(), u64::MAX);
    }

    #[test]
    fn test_verify() {
        let task = Task::new(0, 1000, "a", "b", "");
        let hash = crate::hash::hex_digest("17ab");
        let mut result = SearchResult {
            task: Task { prefix: hash[..2].to_string(), ..task },
            hash: hash.clone(),
            number: "17".into(),
            processing_time: 0.0,
            user_id: String::new(),
            timeout: false,
            worker_user: true,
            worker_type: WorkerKind::User,
        };
        assert!(result.verify());

        result.number = "18".into();
        assert!(!result.verify());

        result.number = "2000".into();
        assert!(!result.verify());
    }

    #[test]
    fn test_keep_alive_shape() {
        let ka = KeepAlive {
            worker_id: "worker-abc".into(),
            worker_user: true,
            worker_type: WorkerKind::User,
        };
        assert_eq!(
            serde_json::to_value(&ka).unwrap(),
            json!({"worker_id": "worker-abc", "worker_user": true, "worker_type": "worker_user"})
        );
    }

    #[test]
    fn test_metrics_parse() {
        let metrics: Metrics = serde_json::from_value(json!({
            "data": {
                "000": {
                    "worker_cpu": {"cant": 3, "processing_time": 1.25},
                    "worker_user": {"cant": 1}
                }
            }
        }))
        .unwrap();
        assert_eq!(metrics.stats("000", WorkerKind::Cpu).unwrap().cant, 3);
        assert_eq!(metrics.stats("000", WorkerKind::User).unwrap().processing_time, 0.0);
        assert!(metrics.stats("1", WorkerKind::Cpu).is_none());
    }
}
