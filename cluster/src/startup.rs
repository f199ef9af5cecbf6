use crate::health::HealthChecker;
use crate::node::{StartMode, StartedNode};
use redis_k8s_client::NodeProcess;
use redis_k8s_common::{
    DiscoveryError, DiscoveryResult, NodeConfig, NodeRole, StandaloneMode, StartupError,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Decide how the local node starts, without touching the process.
pub fn plan_start(
    role: NodeRole,
    discovery: DiscoveryResult,
    config: &NodeConfig,
) -> Result<StartMode, StartupError> {
    match role {
        NodeRole::Master => match discovery {
            DiscoveryResult::Found(master) if master == config.announce => {
                info!("Sentinels already name this node ({}) as master", master);
                Ok(StartMode::Standalone(StandaloneMode::Master))
            }
            DiscoveryResult::Found(master) => Err(StartupError::ConflictingMaster(master)),
            DiscoveryResult::Error(DiscoveryError::Cancelled) => Err(StartupError::Cancelled),
            DiscoveryResult::NotFound | DiscoveryResult::Error(_) => {
                Ok(StartMode::Standalone(StandaloneMode::Master))
            }
        },
        NodeRole::Slave => match discovery {
            DiscoveryResult::Found(master) => Ok(StartMode::ReplicaOf(master)),
            DiscoveryResult::NotFound => Err(StartupError::NoMasterFound { cause: None }),
            DiscoveryResult::Error(cause) => Err(StartupError::NoMasterFound { cause: Some(cause) }),
        },
        NodeRole::Sentinel => match (discovery, &config.sentinel.initial_master) {
            (DiscoveryResult::Found(master), _) => Ok(StartMode::SentinelWatch(master)),
            (DiscoveryResult::Error(DiscoveryError::Cancelled), _) => Err(StartupError::Cancelled),
            (_, Some(initial)) => {
                info!("No master discovered, watching configured initial master {}", initial);
                Ok(StartMode::SentinelWatch(initial.clone()))
            }
            (DiscoveryResult::NotFound, None) => Err(StartupError::NoMasterFound { cause: None }),
            (DiscoveryResult::Error(cause), None) => {
                Err(StartupError::NoMasterFound { cause: Some(cause) })
            }
        },
        NodeRole::ClusterNode => Ok(StartMode::Standalone(StandaloneMode::ClusterMember)),
        NodeRole::ClusterController => Ok(StartMode::NoProcess),
    }
}

/// Brings the local store process up in the mode the role and discovery call for
pub struct StartupDriver {
    process: Arc<dyn NodeProcess>,
    cancel: CancellationToken,
}

impl StartupDriver {
    pub fn new(process: Arc<dyn NodeProcess>, cancel: CancellationToken) -> Self {
        Self { process, cancel }
    }

    pub async fn start(
        &self,
        role: NodeRole,
        discovery: DiscoveryResult,
        config: &NodeConfig,
    ) -> Result<StartedNode, StartupError> {
        let mode = plan_start(role, discovery, config)?;

        if !mode.runs_process() {
            info!("Role {} starts no data node", role);
            return Ok(StartedNode::new(role, mode, config.announce.clone()));
        }
        if self.cancel.is_cancelled() {
            return Err(StartupError::Cancelled);
        }

        info!("Starting {} as {}", role, mode);
        let spawned = match &mode {
            StartMode::Standalone(standalone) => self.process.start_standalone(*standalone).await,
            StartMode::ReplicaOf(master) => self.process.start_replica_of(master).await,
            StartMode::SentinelWatch(master) => self.process.start_sentinel_watch(master).await,
            StartMode::NoProcess => Ok(()),
        };

        let checker = HealthChecker::new(config.startup_timeout);
        let ready = match spawned {
            Ok(()) => checker.wait_healthy(self.process.as_ref(), &self.cancel).await,
            Err(e) => Err(e),
        };

        if let Err(e) = ready {
            error!("Startup as {} failed: {}", mode, e);
            // Never leave a half-started store behind.
            if let Err(stop) = self.process.shutdown().await {
                warn!("Failed to stop store process after failed startup: {}", stop);
            }
            return Err(e);
        }

        Ok(StartedNode::new(role, mode, config.announce.clone()))
    }
}
