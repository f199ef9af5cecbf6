//! Environment-derived node settings.
//!
//! The environment is read exactly once, at process entry, into an immutable
//! [`NodeConfig`] that is passed to every component.

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use crate::types::{NodeAddr, NodeRole};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_STORE_PORT: u16 = 6379;
pub const DEFAULT_SENTINEL_PORT: u16 = 26379;
pub const DEFAULT_MASTER_NAME: &str = "mymaster";
pub const DEFAULT_MASTERS_WANTED: usize = 3;

/// Redis cluster refuses to form with fewer masters than this.
pub const MIN_CLUSTER_MASTERS: usize = 3;

/// Raw key/value view of the environment. Keys are matched case-insensitively.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    master: bool,
    slave: bool,
    sentinel: bool,
    cluster: bool,
    cluster_ctrl: bool,

    sentinel_addr: Option<String>,
    max_attempts: Option<u32>,
    retry_delay_ms: Option<u64>,
    discovery_budget: Option<u32>,
    discovery_timeout_ms: Option<u64>,

    min_cluster_nodes: Option<usize>,
    replicas_per_master: Option<usize>,
    masters_wanted: Option<usize>,
    cluster_nodes: Option<String>,
    cluster_service: Option<String>,
    cluster_timeout_ms: Option<u64>,
    cluster_poll_interval_ms: Option<u64>,

    master_name: Option<String>,
    initial_master: Option<String>,
    announce_ip: Option<String>,
    pod_ip: Option<String>,
    hostname: Option<String>,
    store_port: Option<u16>,
    sentinel_listen_port: Option<u16>,
    sentinel_quorum: Option<u32>,
    startup_timeout_ms: Option<u64>,

    redis_server_bin: Option<String>,
    redis_cli_bin: Option<String>,
    redis_conf: Option<String>,
    health_addr: Option<String>,
}

/// The five mutually exclusive role switches, exactly as set in the environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleFlags {
    pub master: bool,
    pub slave: bool,
    pub sentinel: bool,
    pub cluster: bool,
    pub cluster_ctrl: bool,
}

impl RoleFlags {
    /// Names of the flags that are switched on, in declaration order.
    pub fn enabled(&self) -> Vec<&'static str> {
        [
            (self.master, "MASTER"),
            (self.slave, "SLAVE"),
            (self.sentinel, "SENTINEL"),
            (self.cluster, "CLUSTER"),
            (self.cluster_ctrl, "CLUSTER_CTRL"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect()
    }
}

/// Sentinel-mode settings
#[derive(Debug, Clone)]
pub struct SentinelSettings {
    /// Sentinel endpoints queried in order during discovery
    pub endpoints: Vec<NodeAddr>,
    pub master_name: String,
    pub initial_master: Option<NodeAddr>,
    pub listen_port: u16,
    pub quorum: u32,
}

/// Cluster-mode settings
#[derive(Debug, Clone)]
pub struct ClusterSettings {
    /// Static `host:port` targets, resolved on every poll round
    pub nodes: Vec<String>,
    /// Headless service `name:port`, resolved on every poll round
    pub service: Option<String>,
    pub replicas_per_master: usize,
    pub masters_wanted: usize,
    pub min_nodes: usize,
    pub poll: RetryPolicy,
}

/// How the local store process is launched
#[derive(Debug, Clone)]
pub struct ProcessSettings {
    pub server_bin: String,
    pub cli_bin: String,
    pub conf: Option<PathBuf>,
}

/// Which variable the announce host was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceSource {
    AnnounceIp,
    PodIp,
    /// Sentinels report IPs, so a hostname never matches a discovered master
    Hostname,
    Loopback,
}

impl AnnounceSource {
    /// Whether the announce host can be compared with the addresses sentinels report.
    pub fn matches_sentinel_reports(&self) -> bool {
        matches!(self, AnnounceSource::AnnounceIp | AnnounceSource::PodIp)
    }
}

/// Immutable node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub flags: RoleFlags,
    /// Address other pods use to reach this node's store port
    pub announce: NodeAddr,
    pub announce_source: AnnounceSource,
    pub sentinel: SentinelSettings,
    pub discovery: RetryPolicy,
    pub startup_timeout: Duration,
    pub cluster: ClusterSettings,
    pub process: ProcessSettings,
    pub health_addr: Option<SocketAddr>,
}

impl NodeConfig {
    /// Read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(config::Environment::default())
    }

    /// Read an explicit key/value map, used where the process environment must not leak in.
    pub fn from_map<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Result<Self, ConfigError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        Self::load(config::Environment::default().source(Some(map)))
    }

    fn load(env: config::Environment) -> Result<Self, ConfigError> {
        let raw: RawConfig = config::Config::builder()
            .add_source(env.ignore_empty(true).try_parsing(true))
            .build()?
            .try_deserialize()?;

        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let flags = RoleFlags {
            master: raw.master,
            slave: raw.slave,
            sentinel: raw.sentinel,
            cluster: raw.cluster,
            cluster_ctrl: raw.cluster_ctrl,
        };

        let store_port = raw.store_port.unwrap_or(DEFAULT_STORE_PORT);
        let (host, announce_source) = [
            (raw.announce_ip, AnnounceSource::AnnounceIp),
            (raw.pod_ip, AnnounceSource::PodIp),
            (raw.hostname, AnnounceSource::Hostname),
        ]
        .into_iter()
        .filter_map(|(host, source)| Some((host?.trim().to_string(), source)))
        .find(|(host, _)| !host.is_empty())
        .unwrap_or_else(|| ("127.0.0.1".to_string(), AnnounceSource::Loopback));
        let announce = NodeAddr::new(host, store_port);

        let endpoints = parse_list(raw.sentinel_addr.as_deref())
            .into_iter()
            .map(|s| s.parse::<NodeAddr>())
            .collect::<Result<Vec<_>, _>>()?;

        let initial_master = raw
            .initial_master
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<NodeAddr>)
            .transpose()?;

        let max_attempts = positive(raw.max_attempts.unwrap_or(5), "MAX_ATTEMPTS")?;
        let retry_delay = Duration::from_millis(raw.retry_delay_ms.unwrap_or(2000));
        let default_budget = max_attempts.saturating_mul(endpoints.len() as u32);
        let discovery = RetryPolicy::new(
            max_attempts,
            retry_delay,
            raw.discovery_budget.unwrap_or(default_budget),
            Duration::from_millis(raw.discovery_timeout_ms.unwrap_or(60_000)),
        );

        let replicas_per_master = raw.replicas_per_master.unwrap_or(1);
        let (masters_wanted, min_nodes) =
            cluster_size(replicas_per_master, raw.masters_wanted, raw.min_cluster_nodes)?;

        let poll_interval = Duration::from_millis(raw.cluster_poll_interval_ms.unwrap_or(5_000));
        let cluster = ClusterSettings {
            nodes: parse_list(raw.cluster_nodes.as_deref()),
            service: raw
                .cluster_service
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            replicas_per_master,
            masters_wanted,
            min_nodes,
            poll: RetryPolicy::new(
                u32::MAX,
                poll_interval,
                u32::MAX,
                Duration::from_millis(raw.cluster_timeout_ms.unwrap_or(300_000)),
            ),
        };

        let health_addr = raw
            .health_addr
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<SocketAddr>().map_err(|e| ConfigError::InvalidAddress {
                    value: s.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        Ok(Self {
            flags,
            announce,
            announce_source,
            sentinel: SentinelSettings {
                endpoints,
                master_name: raw
                    .master_name
                    .unwrap_or_else(|| DEFAULT_MASTER_NAME.to_string()),
                initial_master,
                listen_port: raw.sentinel_listen_port.unwrap_or(DEFAULT_SENTINEL_PORT),
                quorum: raw.sentinel_quorum.unwrap_or(2),
            },
            discovery,
            startup_timeout: Duration::from_millis(raw.startup_timeout_ms.unwrap_or(30_000)),
            cluster,
            process: ProcessSettings {
                server_bin: raw
                    .redis_server_bin
                    .unwrap_or_else(|| "redis-server".to_string()),
                cli_bin: raw.redis_cli_bin.unwrap_or_else(|| "redis-cli".to_string()),
                conf: raw.redis_conf.map(PathBuf::from),
            },
            health_addr,
        })
    }

    /// Check the settings a given role cannot run without.
    pub fn require_for(&self, role: NodeRole) -> Result<(), ConfigError> {
        match role {
            NodeRole::Slave if self.sentinel.endpoints.is_empty() => Err(ConfigError::Missing {
                role: "SLAVE",
                key: "SENTINEL_ADDR",
            }),
            NodeRole::Sentinel
                if self.sentinel.endpoints.is_empty() && self.sentinel.initial_master.is_none() =>
            {
                Err(ConfigError::Missing {
                    role: "SENTINEL",
                    key: "SENTINEL_ADDR or INITIAL_MASTER",
                })
            }
            NodeRole::ClusterController
                if self.cluster.nodes.is_empty() && self.cluster.service.is_none() =>
            {
                Err(ConfigError::Missing {
                    role: "CLUSTER_CTRL",
                    key: "CLUSTER_NODES or CLUSTER_SERVICE",
                })
            }
            _ => Ok(()),
        }
    }
}

/// Work out `(masters_wanted, min_nodes)` with `min_nodes = replicas * masters + masters`.
fn cluster_size(
    replicas_per_master: usize,
    masters_wanted: Option<usize>,
    min_cluster_nodes: Option<usize>,
) -> Result<(usize, usize), ConfigError> {
    let group = replicas_per_master + 1;

    let masters = match (masters_wanted, min_cluster_nodes) {
        (Some(masters), Some(min)) if masters * group != min => {
            return Err(ConfigError::Invalid {
                key: "MIN_CLUSTER_NODES",
                message: format!(
                    "{} does not match {} masters with {} replicas each ({} nodes)",
                    min,
                    masters,
                    replicas_per_master,
                    masters * group
                ),
            });
        }
        (Some(masters), _) => masters,
        (None, Some(min)) => {
            if min % group != 0 {
                return Err(ConfigError::Invalid {
                    key: "MIN_CLUSTER_NODES",
                    message: format!(
                        "{} nodes cannot be split into groups of one master and {} replicas",
                        min, replicas_per_master
                    ),
                });
            }
            min / group
        }
        (None, None) => DEFAULT_MASTERS_WANTED,
    };

    if masters < MIN_CLUSTER_MASTERS {
        return Err(ConfigError::Invalid {
            key: "MASTERS_WANTED",
            message: format!(
                "a cluster needs at least {} masters, got {}",
                MIN_CLUSTER_MASTERS, masters
            ),
        });
    }

    Ok((masters, masters * group))
}

fn positive(value: u32, key: &'static str) -> Result<u32, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            message: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}

/// Split a comma-separated list, dropping blanks.
fn parse_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
