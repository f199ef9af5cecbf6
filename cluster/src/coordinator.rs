use crate::assembler::ClusterAssembler;
use crate::discovery::DiscoveryClient;
use crate::node::StartedNode;
use crate::resolver::resolve;
use crate::startup::StartupDriver;
use crate::types::{ClusterFormed, ClusterPlan};
use redis_k8s_client::{ClusterControl, MasterLocator, NodeProcess};
use redis_k8s_common::{NodeConfig, NodeRole, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Outcome of a successful bootstrap
#[derive(Debug, Clone)]
pub struct BootstrapReport {
    pub role: NodeRole,
    pub node: StartedNode,
    /// Set for the cluster controller only
    pub cluster: Option<ClusterFormed>,
}

/// Role bootstrap coordinator: resolve, discover, start, then assemble for the controller
pub struct BootstrapCoordinator {
    config: NodeConfig,
    process: Arc<dyn NodeProcess>,
    locator: Arc<dyn MasterLocator>,
    control: Arc<dyn ClusterControl>,
    cancel: CancellationToken,
}

impl BootstrapCoordinator {
    pub fn new(
        config: NodeConfig,
        process: Arc<dyn NodeProcess>,
        locator: Arc<dyn MasterLocator>,
        control: Arc<dyn ClusterControl>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            process,
            locator,
            control,
            cancel,
        }
    }

    #[instrument(skip(self), fields(announce = %self.config.announce))]
    pub async fn run(&self) -> Result<BootstrapReport> {
        let role = resolve(&self.config)?;
        self.config.require_for(role)?;
        info!("Resolved role: {}", role);
        if role == NodeRole::Master && !self.config.announce_source.matches_sentinel_reports() {
            warn!(
                "Announce host {} comes from {:?}, not POD_IP or ANNOUNCE_IP; a restarted master will not recognise itself in sentinel reports",
                self.config.announce.host, self.config.announce_source
            );
        }

        let discovery = DiscoveryClient::new(self.locator.clone(), self.cancel.clone())
            .discover(role, &self.config)
            .await;

        let node = StartupDriver::new(self.process.clone(), self.cancel.clone())
            .start(role, discovery, &self.config)
            .await?;
        info!("Node up as {}", node.mode);

        let cluster = match role {
            NodeRole::ClusterController => Some(self.assemble().await?),
            _ => None,
        };

        Ok(BootstrapReport { role, node, cluster })
    }

    #[instrument(skip(self))]
    async fn assemble(&self) -> Result<ClusterFormed> {
        let mut plan = ClusterPlan::from_config(&self.config);
        let formed = ClusterAssembler::new(self.control.clone(), self.cancel.clone())
            .assemble(&mut plan)
            .await?;
        Ok(formed)
    }
}
