//! Pod discovery and priority classification
//!
//! Queries the orchestration API for pods scheduled on the local node and
//! maintains the mapping from priority class to locally running containers.

use crate::models::{ContainerRecord, PodSummary, PriorityClass};
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{api::ListParams, Api, Client};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Read-only pod listing seam. The production implementation talks to the
/// Kubernetes API; tests substitute a scripted lister.
#[async_trait]
pub trait PodLister: Send + Sync {
    /// List pods scheduled on the given node.
    async fn list_node_pods(&self, node_name: &str) -> Result<Vec<PodSummary>>;
}

/// Pod lister backed by the in-cluster Kubernetes API.
pub struct KubePodLister {
    client: Client,
    timeout: Duration,
}

impl KubePodLister {
    /// Build a lister from the default client configuration (in-cluster
    /// service account, or kubeconfig when running outside a cluster).
    pub async fn new(timeout: Duration) -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("Failed to build Kubernetes client")?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl PodLister for KubePodLister {
    async fn list_node_pods(&self, node_name: &str) -> Result<Vec<PodSummary>> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={}", node_name));

        let list = tokio::time::timeout(self.timeout, pods.list(&params))
            .await
            .context("Pod list request timed out")?
            .context("Pod list request failed")?;

        Ok(list.items.iter().map(pod_summary).collect())
    }
}

fn pod_summary(pod: &Pod) -> PodSummary {
    let phase = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.clone())
        .unwrap_or_default();

    let container_ids = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .filter_map(|cs| cs.container_id.as_deref())
                .map(strip_runtime_scheme)
                .collect()
        })
        .unwrap_or_default();

    PodSummary {
        name: pod.metadata.name.clone().unwrap_or_default(),
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        uid: pod.metadata.uid.clone().unwrap_or_default(),
        labels: pod.metadata.labels.clone().unwrap_or_default(),
        phase,
        container_ids,
    }
}

/// Strip the runtime scheme prefix the API reports container ids with
/// (`containerd://<id>`, `docker://<id>`).
pub fn strip_runtime_scheme(container_id: &str) -> String {
    match container_id.split_once("://") {
        Some((_, id)) => id.to_string(),
        None => container_id.to_string(),
    }
}

/// Node-local view of managed containers keyed by priority class.
///
/// The record set is replaced wholesale on every refresh so terminated
/// containers never linger. A failed refresh keeps the previous snapshot:
/// a transient API error must not empty the controller's view.
pub struct WorkloadIndex {
    lister: Arc<dyn PodLister>,
    node_name: String,
    label_key: String,
    records: Vec<ContainerRecord>,
    refresh_errors: u64,
}

impl WorkloadIndex {
    pub fn new(
        lister: Arc<dyn PodLister>,
        node_name: impl Into<String>,
        label_key: impl Into<String>,
    ) -> Self {
        Self {
            lister,
            node_name: node_name.into(),
            label_key: label_key.into(),
            records: Vec::new(),
            refresh_errors: 0,
        }
    }

    /// Refresh the container snapshot from the orchestration API.
    ///
    /// On failure the previous snapshot is retained and the error is
    /// returned for the caller to count; the index itself stays usable.
    pub async fn refresh(&mut self) -> Result<()> {
        let pods = match self.lister.list_node_pods(&self.node_name).await {
            Ok(pods) => pods,
            Err(e) => {
                self.refresh_errors += 1;
                warn!(error = %e, "Pod discovery failed, keeping previous snapshot");
                return Err(e);
            }
        };

        let now = chrono::Utc::now().timestamp();
        let mut records = Vec::new();

        for pod in &pods {
            // Terminated pods keep stale container ids around.
            if pod.phase != "Running" && pod.phase != "Pending" {
                continue;
            }

            let priority = pod
                .labels
                .get(&self.label_key)
                .map(|v| PriorityClass::from_label_value(v))
                .unwrap_or(PriorityClass::Unmanaged);

            if !priority.is_managed() {
                continue;
            }

            for id in &pod.container_ids {
                records.push(ContainerRecord {
                    container_id: id.clone(),
                    pod_name: pod.name.clone(),
                    namespace: pod.namespace.clone(),
                    pod_uid: pod.uid.clone(),
                    priority,
                    discovered_at: now,
                });
            }
        }

        debug!(
            high = records
                .iter()
                .filter(|r| r.priority == PriorityClass::High)
                .count(),
            low = records
                .iter()
                .filter(|r| r.priority == PriorityClass::Low)
                .count(),
            "Discovery snapshot replaced"
        );

        self.records = records;
        Ok(())
    }

    /// All records in the current snapshot.
    pub fn snapshot(&self) -> &[ContainerRecord] {
        &self.records
    }

    /// Records of one priority class.
    pub fn records(&self, class: PriorityClass) -> impl Iterator<Item = &ContainerRecord> {
        self.records.iter().filter(move |r| r.priority == class)
    }

    pub fn count(&self, class: PriorityClass) -> usize {
        self.records(class).count()
    }

    pub fn refresh_errors(&self) -> u64 {
        self.refresh_errors
    }
}
