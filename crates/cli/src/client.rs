//! API client for the node agent's HTTP endpoints

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// HTTP client for one node agent
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }
}

// API response types

/// The `/status` document: controller snapshot plus effective config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_name: String,
    pub high_priority_pods: usize,
    pub low_priority_pods: usize,
    pub contention: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_class_limit: Option<Limit>,
    pub smoothed_low_bps: u64,
    pub throttled: Vec<ThrottledContainer>,
    pub error_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<i64>,
    pub decisions: Vec<TickDecision>,
    pub config: ConfigEcho,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Limit {
    pub read_bps: u64,
    pub write_bps: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottledContainer {
    pub container_id: String,
    pub pod_name: String,
    pub namespace: String,
    pub cgroup_path: String,
    pub device: String,
    pub read_bps: u64,
    pub write_bps: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickDecision {
    pub timestamp: i64,
    pub signal: String,
    pub resolved: usize,
    pub skipped: usize,
    pub applied: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEcho {
    pub poll_interval_secs: u64,
    pub shared_mount_path: String,
    pub priority_label: String,
    pub read_ceiling_bps: u64,
    pub write_ceiling_bps: u64,
    pub read_floor_bps: u64,
    pub write_floor_bps: u64,
    pub saturation_bps: u64,
    pub trigger_ticks: u32,
    pub cooldown_ticks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthDocument {
    pub status: String,
    pub components: HashMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_json() -> serde_json::Value {
        serde_json::json!({
            "node_name": "node-1",
            "high_priority_pods": 1,
            "low_priority_pods": 2,
            "contention": "active",
            "low_class_limit": {"read_bps": 1000, "write_bps": 500},
            "smoothed_low_bps": 123456,
            "throttled": [{
                "container_id": "a".repeat(64),
                "pod_name": "batch-job",
                "namespace": "default",
                "cgroup_path": "/sys/fs/cgroup/kubepods.slice",
                "device": "259:4",
                "read_bps": 1000,
                "write_bps": 500
            }],
            "error_count": 0,
            "last_error": null,
            "last_update": 1700000000,
            "decisions": [{
                "timestamp": 1700000000,
                "signal": "active",
                "resolved": 2,
                "skipped": 0,
                "applied": 2,
                "errors": 0
            }],
            "config": {
                "poll_interval_secs": 5,
                "shared_mount_path": "/mnt/shared",
                "priority_label": "drcio.io/priority",
                "read_ceiling_bps": 209715200u64,
                "write_ceiling_bps": 52428800u64,
                "read_floor_bps": 52428800u64,
                "write_floor_bps": 10485760u64,
                "saturation_bps": 104857600u64,
                "trigger_ticks": 3,
                "cooldown_ticks": 3
            }
        })
    }

    #[tokio::test]
    async fn test_get_status_parses_document() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(status_json().to_string())
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let status: NodeStatus = client.get("/status").await.unwrap();

        mock.assert_async().await;
        assert_eq!(status.node_name, "node-1");
        assert_eq!(status.contention, "active");
        assert_eq!(status.throttled.len(), 1);
        assert_eq!(status.throttled[0].device, "259:4");
        assert_eq!(status.config.poll_interval_secs, 5);
        assert_eq!(status.decisions[0].applied, 2);
    }

    #[tokio::test]
    async fn test_get_propagates_api_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/status")
            .with_status(503)
            .with_body("controller not ready")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let result: Result<NodeStatus> = client.get("/status").await;

        let err = result.unwrap_err().to_string();
        assert!(err.contains("503"));
        assert!(err.contains("controller not ready"));
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(ApiClient::new("not a url").is_err());
    }
}
