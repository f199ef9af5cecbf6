pub mod cluster;
pub mod config;
pub mod process;
pub mod resp;
pub mod sentinel;

use redis_k8s_common::{
    ClusterError, ClusterState, DiscoveryError, NodeAddr, StandaloneMode, StartupError,
};
use std::net::SocketAddr;

pub use cluster::RedisClusterControl;
pub use config::ClientConfig;
pub use process::RedisServer;
pub use sentinel::SentinelLocator;

/// The local store process, driven by the startup step
#[async_trait::async_trait]
pub trait NodeProcess: Send + Sync {
    /// Start with no upstream master
    async fn start_standalone(&self, mode: StandaloneMode) -> Result<(), StartupError>;

    /// Start replicating from `master`
    async fn start_replica_of(&self, master: &NodeAddr) -> Result<(), StartupError>;

    /// Start a sentinel monitoring `initial_master`
    async fn start_sentinel_watch(&self, initial_master: &NodeAddr) -> Result<(), StartupError>;

    /// Whether the started process answers
    async fn health_check(&self) -> bool;

    /// Stop the process if one is running
    async fn shutdown(&self) -> Result<(), StartupError>;
}

/// Answers "who is the current master" for one discovery endpoint
#[async_trait::async_trait]
pub trait MasterLocator: Send + Sync {
    /// `Ok(None)` when the endpoint answered but knows no master.
    async fn query_master(&self, endpoint: &NodeAddr) -> Result<Option<NodeAddr>, DiscoveryError>;
}

/// Cluster-wide operations issued by the controller
#[async_trait::async_trait]
pub trait ClusterControl: Send + Sync {
    /// Cluster view of a single node
    async fn cluster_info(&self, node: SocketAddr) -> Result<ClusterState, ClusterError>;

    /// Create one cluster; the first `nodes.len() / (replica_factor + 1)` nodes become masters
    async fn cluster_create(&self, nodes: &[SocketAddr], replica_factor: usize) -> Result<(), ClusterError>;
}
