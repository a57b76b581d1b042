//! Config convergence across nodes.
//!
//! After writing a category to the store, the coordinator broadcasts a
//! [`ConfigUpdateRequest`] naming the new sequence id as the minimum every
//! node must reach. Each node reloads independently and reports back; nodes
//! that time out or are still stale are retried. Retrying is safe since a
//! node never installs older or equal content twice.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use warden_core::{ConfigStore, NodeConfigApplier};
use warden_proto::{ConfigType, ConfigUpdateRequest, ConfigUpdateResponse};

use crate::error::Error;

/// Default time a node gets to answer one broadcast attempt.
pub const DEFAULT_BROADCAST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of retries per node after the first attempt.
pub const DEFAULT_BROADCAST_RETRIES: u32 = 3;

/// Default pause between attempts.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Delivers reload requests to one node.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Identifier of the target node.
    fn node_id(&self) -> &str;

    /// Ask the node to reload and return its report.
    async fn send(&self, request: &ConfigUpdateRequest) -> Result<ConfigUpdateResponse, Error>;
}

/// Client for the node this process runs.
///
/// The request goes through the wire encoding so the local path behaves like
/// a remote one.
pub struct LocalNodeClient {
    applier: Arc<NodeConfigApplier>,
}

impl LocalNodeClient {
    /// Wrap the local applier.
    pub fn new(applier: Arc<NodeConfigApplier>) -> Self {
        Self { applier }
    }
}

#[async_trait]
impl NodeClient for LocalNodeClient {
    fn node_id(&self) -> &str {
        self.applier.node_id()
    }

    async fn send(&self, request: &ConfigUpdateRequest) -> Result<ConfigUpdateResponse, Error> {
        let decoded = ConfigUpdateRequest::decode(&request.encode()?)?;
        Ok(self.applier.reload(&decoded))
    }
}

/// What one broadcast achieved.
#[derive(Debug, Clone, Default)]
pub struct BroadcastOutcome {
    /// Last report from every node that answered.
    pub responses: Vec<ConfigUpdateResponse>,
    /// Nodes that never answered.
    pub unreachable: Vec<String>,
}

impl BroadcastOutcome {
    /// Whether every node answered and reached the minimum.
    pub fn is_converged(&self) -> bool {
        self.unreachable.is_empty() && self.responses.iter().all(ConfigUpdateResponse::is_converged)
    }

    /// Nodes that answered but are still behind.
    pub fn stale_nodes(&self) -> Vec<&str> {
        self.responses
            .iter()
            .filter(|r| !r.is_converged())
            .map(|r| r.node_id.as_str())
            .collect()
    }
}

/// Writes config and drives all nodes to it.
pub struct ConfigCoordinator {
    store: Arc<dyn ConfigStore>,
    nodes: Vec<Arc<dyn NodeClient>>,
    timeout: Duration,
    retries: u32,
    backoff: Duration,
}

impl ConfigCoordinator {
    /// Create a coordinator with default timeout and retries.
    pub fn new(store: Arc<dyn ConfigStore>, nodes: Vec<Arc<dyn NodeClient>>) -> Self {
        Self {
            store,
            nodes,
            timeout: DEFAULT_BROADCAST_TIMEOUT,
            retries: DEFAULT_BROADCAST_RETRIES,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of retries.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the pause between attempts.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// Store new content and broadcast it.
    pub async fn update(&self, config_type: ConfigType, content: &str) -> Result<BroadcastOutcome, Error> {
        let sequence_id = self.store.store(config_type, content)?;
        tracing::info!(config_type = %config_type, sequence_id, "stored config update");
        Ok(self
            .broadcast(&ConfigUpdateRequest::with_minimums([(config_type, sequence_id)]))
            .await)
    }

    /// Send `request` to every node concurrently.
    pub async fn broadcast(&self, request: &ConfigUpdateRequest) -> BroadcastOutcome {
        let attempts = self.nodes.iter().map(|node| self.deliver(node.as_ref(), request));
        let mut outcome = BroadcastOutcome::default();

        for (node, result) in self.nodes.iter().zip(join_all(attempts).await) {
            match result {
                Some(response) => outcome.responses.push(response),
                None => outcome.unreachable.push(node.node_id().to_string()),
            }
        }

        if outcome.is_converged() {
            tracing::info!(nodes = self.nodes.len(), "config converged");
        } else {
            tracing::warn!(
                stale = ?outcome.stale_nodes(),
                unreachable = ?outcome.unreachable,
                "config did not converge"
            );
        }
        outcome
    }

    /// Deliver to one node, retrying until it converges or attempts run out.
    async fn deliver(&self, node: &dyn NodeClient, request: &ConfigUpdateRequest) -> Option<ConfigUpdateResponse> {
        let mut last = None;

        for attempt in 0..=self.retries {
            if attempt > 0 {
                tokio::time::sleep(self.backoff).await;
            }
            match tokio::time::timeout(self.timeout, node.send(request)).await {
                Ok(Ok(response)) => {
                    if response.is_converged() {
                        return Some(response);
                    }
                    tracing::debug!(
                        node = %node.node_id(),
                        attempt,
                        stale = ?response.stale_types(),
                        "node still stale"
                    );
                    last = Some(response);
                }
                Ok(Err(err)) => {
                    tracing::warn!(node = %node.node_id(), attempt, error = %err, "reload request failed");
                }
                Err(_) => {
                    tracing::warn!(node = %node.node_id(), attempt, timeout = ?self.timeout, "reload request timed out");
                }
            }
        }
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use warden_core::{MemoryConfigStore, RoleRegistry};
    use warden_proto::ReloadStatus;

    fn node(id: &str, store: Arc<MemoryConfigStore>) -> Arc<NodeConfigApplier> {
        Arc::new(NodeConfigApplier::new(id, store, Arc::new(RoleRegistry::new())))
    }

    /// Fails a fixed number of times before delegating.
    struct Flaky {
        inner: LocalNodeClient,
        failures: AtomicU32,
    }

    #[async_trait]
    impl NodeClient for Flaky {
        fn node_id(&self) -> &str {
            self.inner.node_id()
        }

        async fn send(&self, request: &ConfigUpdateRequest) -> Result<ConfigUpdateResponse, Error> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::Node("connection reset".into()));
            }
            self.inner.send(request).await
        }
    }

    struct Hung(String);

    #[async_trait]
    impl NodeClient for Hung {
        fn node_id(&self) -> &str {
            &self.0
        }

        async fn send(&self, _request: &ConfigUpdateRequest) -> Result<ConfigUpdateResponse, Error> {
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_update_converges_all_nodes() {
        let store = Arc::new(MemoryConfigStore::new());
        let a = node("a", store.clone());
        let b = node("b", store.clone());
        let coordinator = ConfigCoordinator::new(
            store.clone(),
            vec![
                Arc::new(LocalNodeClient::new(a.clone())),
                Arc::new(LocalNodeClient::new(b.clone())),
            ],
        );

        let outcome = coordinator
            .update(ConfigType::Roles, r#"{"reader": {}}"#)
            .await
            .unwrap();
        assert!(outcome.is_converged());
        assert_eq!(outcome.responses.len(), 2);
        assert!(a.registry().snapshot().role("reader").is_some());
        assert!(b.registry().snapshot().role("reader").is_some());
    }

    #[tokio::test]
    async fn test_failed_attempts_are_retried() {
        let store = Arc::new(MemoryConfigStore::new());
        let a = node("a", store.clone());
        let flaky = Flaky {
            inner: LocalNodeClient::new(a.clone()),
            failures: AtomicU32::new(2),
        };
        let coordinator = ConfigCoordinator::new(store.clone(), vec![Arc::new(flaky)])
            .with_retries(2)
            .with_backoff(Duration::from_millis(1));

        let outcome = coordinator.update(ConfigType::Roles, "{}").await.unwrap();
        assert!(outcome.is_converged());
        assert_eq!(a.registry().sequence_id(ConfigType::Roles), 1);
    }

    #[tokio::test]
    async fn test_lagging_store_replica_reports_stale() {
        let primary = Arc::new(MemoryConfigStore::new());
        let replica = Arc::new(MemoryConfigStore::new());
        let lagging = node("lagging", replica.clone());
        let coordinator = ConfigCoordinator::new(primary.clone(), vec![Arc::new(LocalNodeClient::new(lagging.clone()))])
            .with_retries(1)
            .with_backoff(Duration::from_millis(1));

        let outcome = coordinator.update(ConfigType::Roles, "{}").await.unwrap();
        assert!(!outcome.is_converged());
        assert_eq!(outcome.stale_nodes(), vec!["lagging"]);
        assert_eq!(
            outcome.responses[0].statuses[0].1,
            ReloadStatus::StillStale {
                installed: 0,
                loaded: 0,
                minimum: Some(1)
            }
        );
    }

    #[tokio::test]
    async fn test_hung_node_times_out() {
        let store = Arc::new(MemoryConfigStore::new());
        let coordinator = ConfigCoordinator::new(store, vec![Arc::new(Hung("slow".into()))])
            .with_timeout(Duration::from_millis(10))
            .with_retries(1)
            .with_backoff(Duration::from_millis(1));

        let outcome = coordinator.update(ConfigType::Config, "{}").await.unwrap();
        assert_eq!(outcome.unreachable, vec!["slow".to_string()]);
        assert!(!outcome.is_converged());
    }
}
