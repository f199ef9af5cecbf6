use crate::types::{ClusterFormed, ClusterPlan, NodeProbe};
use redis_k8s_client::ClusterControl;
use redis_k8s_common::{Admission, ClusterError};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Polls the cluster nodes until enough of them are up, then creates the cluster once
pub struct ClusterAssembler {
    control: Arc<dyn ClusterControl>,
    cancel: CancellationToken,
}

impl ClusterAssembler {
    pub fn new(control: Arc<dyn ClusterControl>, cancel: CancellationToken) -> Self {
        Self { control, cancel }
    }

    pub async fn assemble(&self, plan: &mut ClusterPlan) -> Result<ClusterFormed, ClusterError> {
        let required = plan.min_nodes();
        let mut budget = plan.poll.begin();
        let mut rejected: Option<String> = None;

        info!(
            "Waiting for {} cluster nodes ({} masters, {} replica(s) each)",
            required, plan.masters_wanted, plan.replica_factor
        );

        loop {
            match budget.admit() {
                Admission::Granted => {}
                Admission::Exhausted | Admission::Expired => return Err(give_up(plan, rejected)),
            }

            // A round that outlives the deadline leaves whatever it probed so far in the plan.
            match tokio::time::timeout(budget.remaining(), self.poll_round(plan)).await {
                Ok(polled) => polled?,
                Err(_) => {
                    warn!("Poll round still running at the cluster deadline");
                    return Err(give_up(plan, rejected));
                }
            }

            if let Some(addr) = plan.formed_node() {
                info!("{} already belongs to a formed cluster, nothing to create", addr);
                return Ok(ClusterFormed {
                    already_formed: true,
                    layout: None,
                });
            }

            match plan.layout() {
                Some(layout) => {
                    let nodes = layout.node_list();
                    info!(
                        "Creating cluster with masters {:?} and {} replica(s)",
                        layout.masters,
                        layout.replicas.len()
                    );

                    let create = self.control.cluster_create(&nodes, plan.replica_factor);
                    let created = tokio::select! {
                        _ = self.cancel.cancelled() => return Err(ClusterError::Cancelled),
                        created = tokio::time::timeout(budget.remaining(), create) => created,
                    };
                    let Ok(created) = created else {
                        warn!("Cluster create still running at the cluster deadline");
                        return Err(ClusterError::CreateRejected(format!(
                            "create did not finish within {} ms",
                            plan.poll.deadline.as_millis()
                        )));
                    };

                    match created {
                        Ok(()) => {
                            info!("Cluster created over {} nodes", nodes.len());
                            return Ok(ClusterFormed {
                                already_formed: false,
                                layout: Some(layout),
                            });
                        }
                        Err(ClusterError::Cancelled) => return Err(ClusterError::Cancelled),
                        Err(e) => {
                            warn!("Cluster create failed, will retry: {}", e);
                            rejected = Some(match e {
                                ClusterError::CreateRejected(reason) => reason,
                                other => other.to_string(),
                            });
                        }
                    }
                }
                None => {
                    rejected = None;
                    info!(
                        "{}/{} nodes reachable and unassigned, waiting",
                        plan.unassigned().len(),
                        required
                    );
                }
            }

            budget
                .pause(&self.cancel)
                .await
                .map_err(|_| ClusterError::Cancelled)?;
        }
    }

    /// Resolve every target and record a fresh probe of each resolved node.
    pub async fn poll_round(&self, plan: &mut ClusterPlan) -> Result<(), ClusterError> {
        let addrs = tokio::select! {
            _ = self.cancel.cancelled() => return Err(ClusterError::Cancelled),
            addrs = resolve_targets(&plan.targets) => addrs,
        };
        plan.retain_only(&addrs);

        for addr in addrs {
            let info = tokio::select! {
                _ = self.cancel.cancelled() => return Err(ClusterError::Cancelled),
                info = self.control.cluster_info(addr) => info,
            };

            let probe = match info {
                Ok(state) if state.is_unassigned() => NodeProbe::Unassigned,
                Ok(state) => NodeProbe::Clustered(state),
                Err(e) => {
                    debug!("{} not ready: {}", addr, e);
                    NodeProbe::Unreachable(e.to_string())
                }
            };
            plan.record(addr, probe);
        }

        Ok(())
    }
}

fn give_up(plan: &ClusterPlan, rejected: Option<String>) -> ClusterError {
    match rejected {
        Some(reason) => ClusterError::CreateRejected(reason),
        None => ClusterError::InsufficientNodes {
            reachable: plan.unassigned().len(),
            required: plan.min_nodes(),
        },
    }
}

/// Targets that fail to resolve are skipped for this round.
async fn resolve_targets(targets: &[String]) -> Vec<SocketAddr> {
    let mut addrs = BTreeSet::new();

    for target in targets {
        match tokio::net::lookup_host(target.as_str()).await {
            Ok(resolved) => addrs.extend(resolved),
            Err(e) => debug!("Could not resolve {}: {}", target, e),
        }
    }

    addrs.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use redis_k8s_common::{ClusterState, RetryPolicy, CLUSTER_SLOTS};
    use std::collections::HashMap;
    use std::time::Duration;

    /// Nodes answer once their remaining failure count reaches zero
    struct FakeCluster {
        failures_left: Mutex<HashMap<SocketAddr, u32>>,
        formed: Mutex<Vec<SocketAddr>>,
        reject_creates: bool,
        hang_creates: bool,
        hang_probes: bool,
        creates: Mutex<Vec<(Vec<SocketAddr>, usize)>>,
    }

    impl FakeCluster {
        fn new(failures_left: &[(u16, u32)]) -> Self {
            Self {
                failures_left: Mutex::new(failures_left.iter().map(|(p, n)| (local(*p), *n)).collect()),
                formed: Mutex::new(Vec::new()),
                reject_creates: false,
                hang_creates: false,
                hang_probes: false,
                creates: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl ClusterControl for FakeCluster {
        async fn cluster_info(&self, node: SocketAddr) -> Result<ClusterState, ClusterError> {
            if self.hang_probes {
                std::future::pending::<()>().await;
            }
            if self.formed.lock().contains(&node) {
                return Ok(ClusterState {
                    state_ok: true,
                    slots_assigned: CLUSTER_SLOTS,
                    known_nodes: 6,
                    size: 3,
                });
            }

            let mut failures = self.failures_left.lock();
            match failures.get_mut(&node) {
                Some(0) => Ok(ClusterState {
                    state_ok: false,
                    slots_assigned: 0,
                    known_nodes: 1,
                    size: 0,
                }),
                Some(n) => {
                    *n -= 1;
                    Err(ClusterError::Probe {
                        addr: node.to_string(),
                        reason: "connection refused".to_string(),
                    })
                }
                None => Err(ClusterError::Probe {
                    addr: node.to_string(),
                    reason: "connection refused".to_string(),
                }),
            }
        }

        async fn cluster_create(&self, nodes: &[SocketAddr], replica_factor: usize) -> Result<(), ClusterError> {
            self.creates.lock().push((nodes.to_vec(), replica_factor));
            if self.hang_creates {
                std::future::pending::<()>().await;
            }
            if self.reject_creates {
                return Err(ClusterError::CreateRejected("Node is not empty".to_string()));
            }
            self.formed.lock().extend_from_slice(nodes);
            Ok(())
        }
    }

    fn local(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn plan(ports: std::ops::RangeInclusive<u16>, deadline: Duration) -> ClusterPlan {
        let targets = ports.map(|p| format!("127.0.0.1:{}", p)).collect();
        let poll = RetryPolicy::new(u32::MAX, Duration::from_millis(2), u32::MAX, deadline);
        ClusterPlan::new(targets, 1, 3, poll)
    }

    #[tokio::test]
    async fn test_six_nodes_form_three_masters_three_replicas() {
        let control = Arc::new(FakeCluster::new(&[
            (7001, 0),
            (7002, 0),
            (7003, 2),
            (7004, 0),
            (7005, 1),
            (7006, 0),
        ]));
        let assembler = ClusterAssembler::new(control.clone(), CancellationToken::new());
        let mut plan = plan(7001..=7006, Duration::from_secs(5));

        let formed = assembler.assemble(&mut plan).await.unwrap();

        assert!(!formed.already_formed);
        let layout = formed.layout.unwrap();
        assert_eq!(layout.masters, vec![local(7001), local(7002), local(7003)]);
        assert_eq!(layout.replicas[0], (local(7004), local(7001)));

        let creates = control.creates.lock();
        assert_eq!(creates.len(), 1);
        assert_eq!(creates[0].0, (7001..=7006).map(local).collect::<Vec<_>>());
        assert_eq!(creates[0].1, 1);
    }

    #[tokio::test]
    async fn test_five_nodes_are_insufficient() {
        let control = Arc::new(FakeCluster::new(&[(7001, 0), (7002, 0), (7003, 0), (7004, 0), (7005, 0)]));
        let assembler = ClusterAssembler::new(control.clone(), CancellationToken::new());
        let mut plan = plan(7001..=7006, Duration::from_millis(30));

        let result = assembler.assemble(&mut plan).await;

        assert_eq!(
            result,
            Err(ClusterError::InsufficientNodes {
                reachable: 5,
                required: 6
            })
        );
        assert!(control.creates.lock().is_empty());
    }

    #[tokio::test]
    async fn test_already_formed_cluster_is_left_alone() {
        let mut control = FakeCluster::new(&[(7001, 0), (7002, 0)]);
        control.formed = Mutex::new(vec![local(7003)]);
        let control = Arc::new(control);
        let assembler = ClusterAssembler::new(control.clone(), CancellationToken::new());
        let mut plan = plan(7001..=7006, Duration::from_secs(5));

        let formed = assembler.assemble(&mut plan).await.unwrap();

        assert!(formed.already_formed);
        assert!(formed.layout.is_none());
        assert!(control.creates.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_create_is_reported_after_deadline() {
        let mut control = FakeCluster::new(&(7001..=7006).map(|p| (p, 0)).collect::<Vec<_>>());
        control.reject_creates = true;
        let control = Arc::new(control);
        let assembler = ClusterAssembler::new(control.clone(), CancellationToken::new());
        let mut plan = plan(7001..=7006, Duration::from_millis(30));

        let result = assembler.assemble(&mut plan).await;

        assert_eq!(result, Err(ClusterError::CreateRejected("Node is not empty".to_string())));
        assert!(control.creates.lock().len() >= 1);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_polling() {
        let control = Arc::new(FakeCluster::new(&[]));
        let cancel = CancellationToken::new();
        let assembler = ClusterAssembler::new(control, cancel.clone());
        let mut plan = plan(7001..=7006, Duration::from_secs(30));
        plan.poll.delay = Duration::from_secs(30);

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        let result = assembler.assemble(&mut plan).await;
        canceller.await.unwrap();

        assert_eq!(result, Err(ClusterError::Cancelled));
    }

    #[tokio::test]
    async fn test_second_run_finds_the_cluster_it_created() {
        let control = Arc::new(FakeCluster::new(&(7001..=7006).map(|p| (p, 0)).collect::<Vec<_>>()));
        let assembler = ClusterAssembler::new(control.clone(), CancellationToken::new());

        let first = assembler.assemble(&mut plan(7001..=7006, Duration::from_secs(5))).await.unwrap();
        let second = assembler.assemble(&mut plan(7001..=7006, Duration::from_secs(5))).await.unwrap();

        assert!(!first.already_formed);
        assert!(second.already_formed);
        assert!(second.layout.is_none());
        assert_eq!(control.creates.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_hanging_create_is_cut_off_at_the_deadline() {
        let mut control = FakeCluster::new(&(7001..=7006).map(|p| (p, 0)).collect::<Vec<_>>());
        control.hang_creates = true;
        let control = Arc::new(control);
        let assembler = ClusterAssembler::new(control.clone(), CancellationToken::new());
        let mut plan = plan(7001..=7006, Duration::from_millis(50));

        let result = tokio::time::timeout(Duration::from_secs(2), assembler.assemble(&mut plan))
            .await
            .expect("assemble must return once the cluster deadline passes");

        assert!(matches!(result, Err(ClusterError::CreateRejected(_))));
        assert_eq!(control.creates.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_hanging_node_is_cut_off_at_the_deadline() {
        let mut control = FakeCluster::new(&(7001..=7006).map(|p| (p, 0)).collect::<Vec<_>>());
        control.hang_probes = true;
        let control = Arc::new(control);
        let assembler = ClusterAssembler::new(control.clone(), CancellationToken::new());
        let mut plan = plan(7001..=7006, Duration::from_millis(50));

        let result = tokio::time::timeout(Duration::from_secs(2), assembler.assemble(&mut plan))
            .await
            .expect("assemble must return once the cluster deadline passes");

        assert_eq!(
            result,
            Err(ClusterError::InsufficientNodes {
                reachable: 0,
                required: 6
            })
        );
        assert!(control.creates.lock().is_empty());
    }
}
