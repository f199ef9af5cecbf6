use redis_k8s_client::MasterLocator;
use redis_k8s_common::{
    Admission, DiscoveryError, DiscoveryResult, NodeAddr, NodeConfig, NodeRole, RetryPolicy,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Finds the current master by asking the configured sentinels in order
pub struct DiscoveryClient {
    locator: Arc<dyn MasterLocator>,
    cancel: CancellationToken,
}

impl DiscoveryClient {
    pub fn new(locator: Arc<dyn MasterLocator>, cancel: CancellationToken) -> Self {
        Self { locator, cancel }
    }

    pub async fn discover(&self, role: NodeRole, config: &NodeConfig) -> DiscoveryResult {
        if !role.discovers_master() {
            return DiscoveryResult::NotFound;
        }

        let endpoints = &config.sentinel.endpoints;
        if endpoints.is_empty() {
            return settle(role, DiscoveryError::NoEndpoints);
        }

        info!(
            "Looking for the current master via {} endpoint(s), up to {} attempts each",
            endpoints.len(),
            config.discovery.max_attempts
        );

        match self.query_endpoints(endpoints, &config.discovery).await {
            Ok(master) => {
                info!("Current master is {}", master);
                DiscoveryResult::Found(master)
            }
            Err(e) => settle(role, e),
        }
    }

    /// First endpoint to name a master wins; nothing is queried after that.
    async fn query_endpoints(
        &self,
        endpoints: &[NodeAddr],
        policy: &RetryPolicy,
    ) -> Result<NodeAddr, DiscoveryError> {
        let mut budget = policy.begin();
        let mut last_error: Option<String> = None;

        for endpoint in endpoints {
            for attempt in 1..=policy.max_attempts {
                if attempt > 1 {
                    budget
                        .pause(&self.cancel)
                        .await
                        .map_err(|_| DiscoveryError::Cancelled)?;
                }

                match budget.admit() {
                    Admission::Granted => {}
                    Admission::Exhausted => {
                        return Err(DiscoveryError::Exhausted {
                            attempts: budget.used(),
                            last_error,
                        });
                    }
                    Admission::Expired => {
                        return Err(DiscoveryError::Timeout {
                            elapsed_ms: budget.elapsed().as_millis() as u64,
                        });
                    }
                }

                let query = tokio::time::timeout(budget.remaining(), self.locator.query_master(endpoint));
                let outcome = tokio::select! {
                    _ = self.cancel.cancelled() => return Err(DiscoveryError::Cancelled),
                    outcome = query => outcome,
                };

                match outcome {
                    Ok(Ok(Some(master))) => {
                        debug!("{} reported master {} on attempt {}", endpoint, master, attempt);
                        return Ok(master);
                    }
                    Ok(Ok(None)) => {
                        debug!("{} knows no master (attempt {}/{})", endpoint, attempt, policy.max_attempts);
                        last_error = Some(format!("{} knows no master", endpoint));
                    }
                    Ok(Err(e)) => {
                        warn!("Discovery attempt {}/{} failed: {}", attempt, policy.max_attempts, e);
                        last_error = Some(e.to_string());
                    }
                    Err(_) => {
                        return Err(DiscoveryError::Timeout {
                            elapsed_ms: budget.elapsed().as_millis() as u64,
                        });
                    }
                }
            }
        }

        Err(DiscoveryError::Exhausted {
            attempts: budget.used(),
            last_error,
        })
    }
}

/// A master that finds nobody else becomes the master; everyone else needs one.
fn settle(role: NodeRole, error: DiscoveryError) -> DiscoveryResult {
    match (role, error) {
        (_, DiscoveryError::Cancelled) => DiscoveryResult::Error(DiscoveryError::Cancelled),
        (NodeRole::Master, e) => {
            info!("No existing master found ({}), this node becomes master", e);
            DiscoveryResult::NotFound
        }
        (_, e) => {
            warn!("Master discovery failed: {}", e);
            DiscoveryResult::Error(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Answers from a script, one entry per call; repeats the last entry when exhausted
    struct ScriptedLocator {
        script: Vec<Result<Option<NodeAddr>, DiscoveryError>>,
        calls: Mutex<Vec<NodeAddr>>,
    }

    impl ScriptedLocator {
        fn new(script: Vec<Result<Option<NodeAddr>, DiscoveryError>>) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<NodeAddr> {
            self.calls.lock().clone()
        }
    }

    #[async_trait::async_trait]
    impl MasterLocator for ScriptedLocator {
        async fn query_master(&self, endpoint: &NodeAddr) -> Result<Option<NodeAddr>, DiscoveryError> {
            let mut calls = self.calls.lock();
            let index = calls.len().min(self.script.len() - 1);
            calls.push(endpoint.clone());
            self.script[index].clone()
        }
    }

    fn config(role: &str, sentinels: &str, max_attempts: u32) -> NodeConfig {
        NodeConfig::from_map([
            (role.to_string(), "true".to_string()),
            ("SENTINEL_ADDR".to_string(), sentinels.to_string()),
            ("MAX_ATTEMPTS".to_string(), max_attempts.to_string()),
            ("RETRY_DELAY_MS".to_string(), "1".to_string()),
        ])
        .unwrap()
    }

    fn master() -> NodeAddr {
        NodeAddr::new("10.0.0.5", 6379)
    }

    #[tokio::test]
    async fn test_found_on_third_attempt_stops_querying() {
        let locator = ScriptedLocator::new(vec![
            Ok(None),
            Err(DiscoveryError::Unreachable {
                endpoint: "s0:26379".to_string(),
                reason: "refused".to_string(),
            }),
            Ok(Some(master())),
        ]);
        let client = DiscoveryClient::new(locator.clone(), CancellationToken::new());

        let result = client.discover(NodeRole::Slave, &config("SLAVE", "s0:26379,s1:26379", 5)).await;

        assert_eq!(result, DiscoveryResult::Found(master()));
        assert_eq!(locator.calls().len(), 3);
        assert!(locator.calls().iter().all(|e| e.host == "s0"));
    }

    #[tokio::test]
    async fn test_moves_to_next_endpoint_after_max_attempts() {
        let locator = ScriptedLocator::new(vec![Ok(None), Ok(None), Ok(Some(master()))]);
        let client = DiscoveryClient::new(locator.clone(), CancellationToken::new());

        let result = client.discover(NodeRole::Sentinel, &config("SENTINEL", "s0:26379,s1:26379", 2)).await;

        assert_eq!(result, DiscoveryResult::Found(master()));
        let hosts: Vec<String> = locator.calls().into_iter().map(|e| e.host).collect();
        assert_eq!(hosts, vec!["s0", "s0", "s1"]);
    }

    #[tokio::test]
    async fn test_exhausted_endpoints() {
        let locator = ScriptedLocator::new(vec![Ok(None)]);
        let client = DiscoveryClient::new(locator.clone(), CancellationToken::new());

        let as_master = client.discover(NodeRole::Master, &config("MASTER", "s0:26379,s1:26379", 3)).await;
        assert_eq!(as_master, DiscoveryResult::NotFound);
        assert_eq!(locator.calls().len(), 6);

        let as_slave = client.discover(NodeRole::Slave, &config("SLAVE", "s0:26379,s1:26379", 3)).await;
        assert!(matches!(
            as_slave,
            DiscoveryResult::Error(DiscoveryError::Exhausted { attempts: 6, .. })
        ));
    }

    #[tokio::test]
    async fn test_attempt_budget_caps_total_calls() {
        let locator = ScriptedLocator::new(vec![Ok(None)]);
        let client = DiscoveryClient::new(locator.clone(), CancellationToken::new());
        let config = NodeConfig::from_map([
            ("SLAVE", "true"),
            ("SENTINEL_ADDR", "s0:26379,s1:26379,s2:26379"),
            ("MAX_ATTEMPTS", "3"),
            ("RETRY_DELAY_MS", "1"),
            ("DISCOVERY_BUDGET", "4"),
        ])
        .unwrap();

        let result = client.discover(NodeRole::Slave, &config).await;

        assert!(matches!(
            result,
            DiscoveryResult::Error(DiscoveryError::Exhausted { attempts: 4, .. })
        ));
        assert_eq!(locator.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_deadline_yields_timeout() {
        let locator = ScriptedLocator::new(vec![Ok(None)]);
        let client = DiscoveryClient::new(locator, CancellationToken::new());
        let config = NodeConfig::from_map([
            ("SLAVE", "true"),
            ("SENTINEL_ADDR", "s0:26379"),
            ("MAX_ATTEMPTS", "100"),
            ("RETRY_DELAY_MS", "10"),
            ("DISCOVERY_TIMEOUT_MS", "30"),
        ])
        .unwrap();

        let result = client.discover(NodeRole::Slave, &config).await;

        assert!(matches!(result, DiscoveryResult::Error(DiscoveryError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_discovery() {
        let locator = ScriptedLocator::new(vec![Ok(None)]);
        let cancel = CancellationToken::new();
        let client = DiscoveryClient::new(locator, cancel.clone());
        let mut config = config("MASTER", "s0:26379", 5);
        config.discovery.delay = Duration::from_secs(30);

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        let result = client.discover(NodeRole::Master, &config).await;
        canceller.await.unwrap();

        assert_eq!(result, DiscoveryResult::Error(DiscoveryError::Cancelled));
    }

    #[tokio::test]
    async fn test_no_discovery_for_cluster_roles() {
        let locator = ScriptedLocator::new(vec![Ok(Some(master()))]);
        let client = DiscoveryClient::new(locator.clone(), CancellationToken::new());
        let config = config("CLUSTER", "s0:26379", 5);

        assert_eq!(client.discover(NodeRole::ClusterNode, &config).await, DiscoveryResult::NotFound);
        assert_eq!(client.discover(NodeRole::ClusterController, &config).await, DiscoveryResult::NotFound);
        assert!(locator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_no_endpoints() {
        let locator = ScriptedLocator::new(vec![Ok(Some(master()))]);
        let client = DiscoveryClient::new(locator, CancellationToken::new());
        let config = NodeConfig::from_map([("MASTER", "true")]).unwrap();

        assert_eq!(client.discover(NodeRole::Master, &config).await, DiscoveryResult::NotFound);
        assert_eq!(
            client.discover(NodeRole::Slave, &config).await,
            DiscoveryResult::Error(DiscoveryError::NoEndpoints)
        );
    }
}
