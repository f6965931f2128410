//! HTTP clients for the pool coordinator and pool manager.

use std::future::Future;

use reqwest::{Client, Response};

use crate::config::Endpoints;
use crate::error::{MinerError, MinerResult};
use crate::task::{KeepAlive, Metrics, SearchResult};

/// Request/response side of the pool the worker talks to.
pub trait Coordinator: Send + Sync + 'static {
    /// POST a finished search; resolves to the response body.
    fn submit_result(&self, result: &SearchResult) -> impl Future<Output = MinerResult<String>> + Send;

    /// POST a liveness ping.
    fn keep_alive(&self, ping: &KeepAlive) -> impl Future<Output = MinerResult<()>> + Send;

    fn metrics(&self) -> impl Future<Output = MinerResult<Metrics>> + Send;
}

/// Turn non-2xx responses into [`MinerError::Status`].
pub(crate) async fn check_status(response: Response) -> MinerResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(MinerError::Status { status, url, body })
}

#[derive(Clone)]
pub struct PoolClient {
    client: Client,
    coordinator_url: String,
    pool_manager_url: String,
}

impl PoolClient {
    pub fn new(endpoints: &Endpoints) -> Self {
        let endpoints = endpoints.clone().normalized();
        Self {
            client: Client::new(),
            coordinator_url: endpoints.coordinator_url,
            pool_manager_url: endpoints.pool_manager_url,
        }
    }
}

impl Coordinator for PoolClient {
    async fn submit_result(&self, result: &SearchResult) -> MinerResult<String> {
        let response = self
            .client
            .post(format!("{}/solved_task", self.coordinator_url))
            .json(result)
            .send()
            .await?;
        Ok(check_status(response).await?.text().await?)
    }

    async fn keep_alive(&self, ping: &KeepAlive) -> MinerResult<()> {
        let response = self
            .client
            .post(format!("{}/keep_alive", self.pool_manager_url))
            .json(ping)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn metrics(&self) -> MinerResult<Metrics> {
        let response = self
            .client
            .get(format!("{}/metrics", self.coordinator_url))
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, WorkerKind};
    use crate::test_support::HttpStub;

    fn client(url: &str) -> PoolClient {
        PoolClient::new(&Endpoints {
            socket_url: "ws://unused".into(),
            coordinator_url: format!("{url}/"),
            pool_manager_url: url.to_string(),
        })
    }

    #[tokio::test]
    async fn test_submit_result_returns_body() {
        let stub = HttpStub::start(|_| (200, "accepted".into())).await;
        let result = SearchResult {
            task: Task::new(0, 9, "a", "b", ""),
            hash: crate::hash::hex_digest("3ab"),
            number: "3".into(),
            processing_time: 0.1,
            user_id: "u".into(),
            timeout: false,
            worker_user: false,
            worker_type: WorkerKind::Cpu,
        };
        assert_eq!(client(&stub.url).submit_result(&result).await.unwrap(), "accepted");

        let requests = stub.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].path, "/solved_task");
        let body = requests[0].json();
        assert_eq!(body["number"], "3");
        assert_eq!(body["base_string_chain"], "a");
        assert_eq!(body["worker_type"], "worker_cpu");
    }

    #[tokio::test]
    async fn test_keep_alive_error_status() {
        let stub = HttpStub::start(|_| (503, "busy".into())).await;
        let ping = KeepAlive {
            worker_id: "worker-x".into(),
            worker_user: false,
            worker_type: WorkerKind::Cpu,
        };
        let err = client(&stub.url).keep_alive(&ping).await.unwrap_err();
        match err {
            MinerError::Status { status, body, .. } => {
                assert_eq!(status.as_u16(), 503);
                assert_eq!(body, "busy");
            }
            other => panic!("unexpected error {other}"),
        }
        let requests = stub.requests();
        assert_eq!(requests[0].path, "/keep_alive");
        assert_eq!(requests[0].json()["worker_id"], "worker-x");
    }

    #[tokio::test]
    async fn test_metrics() {
        let stub = HttpStub::start(|_| {
            (
                200,
                r#"{"data":{"00":{"worker_cpu":{"cant":2,"processing_time":3.5}}}}"#.into(),
            )
        })
        .await;
        let metrics = client(&stub.url).metrics().await.unwrap();
        assert_eq!(metrics.stats("00", WorkerKind::Cpu).unwrap().cant, 2);
        assert_eq!(stub.requests()[0].method, "GET");
    }
}
