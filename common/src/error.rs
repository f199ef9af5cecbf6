use crate::types::NodeAddr;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BootstrapError>;

/// Malformed or contradictory settings. Fatal, never retried.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no role flag set, expected exactly one of MASTER, SLAVE, SENTINEL, CLUSTER, CLUSTER_CTRL")]
    NoRole,

    #[error("conflicting role flags set: {}", .0.join(", "))]
    ConflictingRoles(Vec<&'static str>),

    #[error("invalid address '{value}': {reason}")]
    InvalidAddress { value: String, reason: String },

    #[error("invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("{role} role requires {key}")]
    Missing { role: &'static str, key: &'static str },

    #[error("failed to read environment: {0}")]
    Source(#[from] config::ConfigError),
}

/// Failure to learn the current master from the configured endpoints.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("endpoint {endpoint} unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("malformed reply from {endpoint}: {reason}")]
    Malformed { endpoint: String, reason: String },

    #[error("no endpoint reported a master after {attempts} attempts{}", last_error_suffix(.last_error))]
    Exhausted {
        attempts: u32,
        last_error: Option<String>,
    },

    #[error("discovery timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },

    #[error("no discovery endpoints configured")]
    NoEndpoints,

    #[error("discovery cancelled")]
    Cancelled,
}

/// Failure to bring the local node up in its resolved role.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartupError {
    #[error("another master is already active at {0}")]
    ConflictingMaster(NodeAddr),

    #[error("no master found{}", cause_suffix(.cause))]
    NoMasterFound { cause: Option<DiscoveryError> },

    #[error("failed to spawn store process: {0}")]
    Spawn(String),

    #[error("store process not healthy after {waited_ms} ms")]
    Unhealthy { waited_ms: u64 },

    #[error("store process exited during startup: {0}")]
    Exited(String),

    #[error("startup cancelled")]
    Cancelled,
}

/// Failure to stitch cluster nodes into one logical cluster.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("only {reachable} of {required} required cluster nodes are reachable and unassigned")]
    InsufficientNodes { reachable: usize, required: usize },

    #[error("cluster create rejected: {0}")]
    CreateRejected(String),

    #[error("cluster probe of {addr} failed: {reason}")]
    Probe { addr: String, reason: String },

    #[error("cluster assembly cancelled")]
    Cancelled,
}

/// Everything that can end a bootstrap run.
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("startup error: {0}")]
    Startup(#[from] StartupError),

    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),
}

/// Process exit status reported to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Started,
    ConfigError,
    NoMasterFound,
    ConflictingMaster,
    InsufficientNodes,
    DiscoveryTimeout,
    StartupFailed,
    ClusterCreateFailed,
    Interrupted,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Started => 0,
            ExitStatus::ConfigError => 2,
            ExitStatus::NoMasterFound => 3,
            ExitStatus::ConflictingMaster => 4,
            ExitStatus::InsufficientNodes => 5,
            ExitStatus::DiscoveryTimeout => 6,
            ExitStatus::StartupFailed => 7,
            ExitStatus::ClusterCreateFailed => 8,
            ExitStatus::Interrupted => 130,
        }
    }
}

impl DiscoveryError {
    fn exit_status(&self) -> ExitStatus {
        match self {
            DiscoveryError::Timeout { .. } => ExitStatus::DiscoveryTimeout,
            DiscoveryError::Cancelled => ExitStatus::Interrupted,
            _ => ExitStatus::NoMasterFound,
        }
    }
}

impl BootstrapError {
    /// Map the failure onto the distinct exit code the orchestrator sees.
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            BootstrapError::Config(_) => ExitStatus::ConfigError,
            BootstrapError::Discovery(e) => e.exit_status(),
            BootstrapError::Startup(e) => match e {
                StartupError::ConflictingMaster(_) => ExitStatus::ConflictingMaster,
                StartupError::NoMasterFound { cause: Some(cause) } => cause.exit_status(),
                StartupError::NoMasterFound { cause: None } => ExitStatus::NoMasterFound,
                StartupError::Spawn(_) | StartupError::Unhealthy { .. } | StartupError::Exited(_) => {
                    ExitStatus::StartupFailed
                }
                StartupError::Cancelled => ExitStatus::Interrupted,
            },
            BootstrapError::Cluster(e) => match e {
                ClusterError::InsufficientNodes { .. } | ClusterError::Probe { .. } => {
                    ExitStatus::InsufficientNodes
                }
                ClusterError::CreateRejected(_) => ExitStatus::ClusterCreateFailed,
                ClusterError::Cancelled => ExitStatus::Interrupted,
            },
        }
    }
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(" (last error: {})", e),
        None => String::new(),
    }
}

fn cause_suffix(cause: &Option<DiscoveryError>) -> String {
    match cause {
        Some(e) => format!(": {}", e),
        None => String::new(),
    }
}
