use crate::resp::{self, Reply};
use crate::{ClientConfig, ClusterControl};
use redis_k8s_common::{ClusterError, ClusterState};
use std::net::SocketAddr;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

/// Cluster control over `CLUSTER INFO` and `redis-cli --cluster create`
pub struct RedisClusterControl {
    cli_bin: String,
    config: ClientConfig,
}

impl RedisClusterControl {
    pub fn new(cli_bin: impl Into<String>, config: ClientConfig) -> Self {
        Self {
            cli_bin: cli_bin.into(),
            config,
        }
    }

    /// Arguments for `redis-cli`; the first `masters` nodes become masters.
    fn create_args(nodes: &[SocketAddr], replica_factor: usize) -> Vec<String> {
        let mut args = vec!["--cluster".to_string(), "create".to_string()];
        args.extend(nodes.iter().map(|n| n.to_string()));
        args.push("--cluster-replicas".to_string());
        args.push(replica_factor.to_string());
        args.push("--cluster-yes".to_string());
        args
    }
}

#[async_trait::async_trait]
impl ClusterControl for RedisClusterControl {
    async fn cluster_info(&self, node: SocketAddr) -> Result<ClusterState, ClusterError> {
        let probe_error = |reason: String| ClusterError::Probe {
            addr: node.to_string(),
            reason,
        };

        let reply = resp::command(&node.to_string(), &["CLUSTER", "INFO"], &self.config)
            .await
            .map_err(|e| probe_error(e.to_string()))?;

        match reply {
            Reply::Bulk(Some(text)) | Reply::Simple(text) => Ok(ClusterState::from_info(&text)),
            Reply::Error(e) => Err(probe_error(e)),
            other => Err(probe_error(format!("unexpected reply {:?}", other))),
        }
    }

    async fn cluster_create(&self, nodes: &[SocketAddr], replica_factor: usize) -> Result<(), ClusterError> {
        let args = Self::create_args(nodes, replica_factor);
        info!("Running {} {}", self.cli_bin, args.join(" "));

        let output = Command::new(&self.cli_bin)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ClusterError::CreateRejected(format!("failed to run {}: {}", self.cli_bin, e)))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = stderr
            .lines()
            .chain(stdout.lines())
            .filter(|l| l.contains("ERR"))
            .last()
            .unwrap_or("no error output")
            .trim()
            .to_string();
        warn!("Cluster create exited with {}: {}", output.status, detail);

        Err(ClusterError::CreateRejected(format!("{} ({})", detail, output.status)))
    }
}
