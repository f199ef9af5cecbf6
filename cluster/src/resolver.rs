use redis_k8s_common::config::RoleFlags;
use redis_k8s_common::{ConfigError, NodeConfig, NodeRole};

/// Decide the role from the five mutually exclusive flags.
pub fn resolve(config: &NodeConfig) -> Result<NodeRole, ConfigError> {
    resolve_flags(&config.flags)
}

pub fn resolve_flags(flags: &RoleFlags) -> Result<NodeRole, ConfigError> {
    let candidates = [
        (flags.master, NodeRole::Master),
        (flags.slave, NodeRole::Slave),
        (flags.sentinel, NodeRole::Sentinel),
        (flags.cluster, NodeRole::ClusterNode),
        (flags.cluster_ctrl, NodeRole::ClusterController),
    ];
    let mut set = candidates.iter().filter(|(on, _)| *on).map(|(_, role)| *role);

    match (set.next(), set.next()) {
        (None, _) => Err(ConfigError::NoRole),
        (Some(role), None) => Ok(role),
        (Some(_), Some(_)) => Err(ConfigError::ConflictingRoles(flags.enabled())),
    }
}
