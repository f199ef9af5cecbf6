use redis_k8s_common::{NodeAddr, NodeRole, StandaloneMode};
use std::time::SystemTime;

/// How the local node was brought up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartMode {
    Standalone(StandaloneMode),
    ReplicaOf(NodeAddr),
    SentinelWatch(NodeAddr),
    /// Cluster controller: no local data node
    NoProcess,
}

impl StartMode {
    pub fn runs_process(&self) -> bool {
        !matches!(self, StartMode::NoProcess)
    }
}

impl std::fmt::Display for StartMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartMode::Standalone(StandaloneMode::Master) => write!(f, "standalone master"),
            StartMode::Standalone(StandaloneMode::ClusterMember) => write!(f, "isolated cluster node"),
            StartMode::ReplicaOf(master) => write!(f, "replica of {}", master),
            StartMode::SentinelWatch(master) => write!(f, "sentinel watching {}", master),
            StartMode::NoProcess => write!(f, "controller without data node"),
        }
    }
}

/// A node that made it through startup
#[derive(Debug, Clone)]
pub struct StartedNode {
    pub role: NodeRole,
    pub mode: StartMode,
    pub address: NodeAddr,
    start_time: SystemTime,
}

impl StartedNode {
    pub fn new(role: NodeRole, mode: StartMode, address: NodeAddr) -> Self {
        Self {
            role,
            mode,
            address,
            start_time: SystemTime::now(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.start_time)
            .unwrap_or_default()
            .as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_started_node() {
        let node = StartedNode::new(
            NodeRole::Master,
            StartMode::Standalone(StandaloneMode::Master),
            NodeAddr::new("10.0.0.1", 6379),
        );

        assert!(node.mode.runs_process());
        assert_eq!(node.uptime_seconds(), 0);
        assert_eq!(node.mode.to_string(), "standalone master");
    }

    #[test]
    fn test_controller_runs_no_process() {
        let node = StartedNode::new(
            NodeRole::ClusterController,
            StartMode::NoProcess,
            NodeAddr::new("10.0.0.1", 6379),
        );

        assert!(!node.mode.runs_process());
        assert_eq!(
            StartMode::ReplicaOf(NodeAddr::new("10.0.0.2", 6379)).to_string(),
            "replica of 10.0.0.2:6379"
        );
    }
}
