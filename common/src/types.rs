use crate::error::{ConfigError, DiscoveryError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of hash slots a Redis cluster must cover before it reports `cluster_state:ok`.
pub const CLUSTER_SLOTS: u32 = 16384;

/// Role this process takes for its whole lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    /// Sentinel-replicated master; may find it has been replaced and refuse to start
    Master,

    /// Replica of whichever master the sentinels report
    Slave,

    /// Monitors the master and answers discovery queries
    Sentinel,

    /// Cluster-enabled node started without any peer linkage
    ClusterNode,

    /// Joins cluster nodes into one cluster; never stores data
    ClusterController,
}

impl NodeRole {
    /// Whether this role spawns a local store process.
    pub fn runs_store(&self) -> bool {
        !matches!(self, NodeRole::ClusterController)
    }

    /// Whether this role asks sentinels for the current master before starting.
    pub fn discovers_master(&self) -> bool {
        matches!(self, NodeRole::Master | NodeRole::Slave | NodeRole::Sentinel)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Master => write!(f, "master"),
            NodeRole::Slave => write!(f, "slave"),
            NodeRole::Sentinel => write!(f, "sentinel"),
            NodeRole::ClusterNode => write!(f, "cluster-node"),
            NodeRole::ClusterController => write!(f, "cluster-controller"),
        }
    }
}

/// `host:port` of a store or sentinel endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl NodeAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for NodeAddr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidAddress {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = s.trim();
        let (host, port) = trimmed
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected host:port"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| invalid("port must be a number between 0 and 65535"))?;

        Ok(Self::new(host, port))
    }
}

impl From<std::net::SocketAddr> for NodeAddr {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// Outcome of asking the discovery endpoints for the current master
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryResult {
    Found(NodeAddr),
    NotFound,
    Error(DiscoveryError),
}

/// How a data node process is launched when it has no upstream master
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandaloneMode {
    /// Plain master that sentinels will later monitor
    Master,

    /// `cluster-enabled yes`, waiting for the controller to wire it up
    ClusterMember,
}

/// Cluster view reported by a single node (`CLUSTER INFO`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    pub state_ok: bool,
    pub slots_assigned: u32,
    pub known_nodes: usize,
    pub size: usize,
}

impl ClusterState {
    /// Parse the `field:value` lines returned by `CLUSTER INFO`.
    pub fn from_info(info: &str) -> Self {
        let mut state = ClusterState::default();

        for line in info.lines() {
            let Some((field, value)) = line.trim().split_once(':') else {
                continue;
            };

            match field {
                "cluster_state" => state.state_ok = value == "ok",
                "cluster_slots_assigned" => state.slots_assigned = value.parse().unwrap_or(0),
                "cluster_known_nodes" => state.known_nodes = value.parse().unwrap_or(0),
                "cluster_size" => state.size = value.parse().unwrap_or(0),
                _ => {}
            }
        }

        state
    }

    /// The node belongs to a cluster that covers every slot.
    pub fn is_formed(&self) -> bool {
        self.state_ok && self.slots_assigned == CLUSTER_SLOTS
    }

    /// The node knows only itself and serves no slots.
    pub fn is_unassigned(&self) -> bool {
        self.known_nodes <= 1 && self.slots_assigned == 0
    }
}
