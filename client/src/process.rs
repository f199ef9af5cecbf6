//! The local `redis-server` process.

use crate::resp::{self, Reply};
use crate::{ClientConfig, NodeProcess};
use redis_k8s_common::config::{ProcessSettings, SentinelSettings};
use redis_k8s_common::{NodeAddr, NodeConfig, StandaloneMode, StartupError};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What the spawned process was asked to be
#[derive(Debug, Clone, PartialEq, Eq)]
enum Launch {
    Standalone(StandaloneMode),
    ReplicaOf(NodeAddr),
    Sentinel(NodeAddr),
}

/// Spawns and supervises one `redis-server` (or `redis-server --sentinel`) child
pub struct RedisServer {
    settings: ProcessSettings,
    sentinel: SentinelSettings,
    announce: NodeAddr,
    config: ClientConfig,
    child: Mutex<Option<Child>>,
    /// Local port of the running process, store port or sentinel port
    listen_port: parking_lot::RwLock<Option<u16>>,
}

impl RedisServer {
    pub fn new(node: &NodeConfig, config: ClientConfig) -> Self {
        Self {
            settings: node.process.clone(),
            sentinel: node.sentinel.clone(),
            announce: node.announce.clone(),
            config,
            child: Mutex::new(None),
            listen_port: parking_lot::RwLock::new(None),
        }
    }

    fn store_args(&self, launch: &Launch) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(conf) = &self.settings.conf {
            args.push(conf.display().to_string());
        }

        let port = self.announce.port.to_string();
        args.extend(["--port".to_string(), port.clone()]);

        match launch {
            Launch::Standalone(StandaloneMode::Master) => {
                args.extend([
                    "--replica-announce-ip".to_string(),
                    self.announce.host.clone(),
                ]);
            }
            Launch::Standalone(StandaloneMode::ClusterMember) => {
                args.extend([
                    "--cluster-enabled".to_string(),
                    "yes".to_string(),
                    "--cluster-config-file".to_string(),
                    format!("nodes-{}.conf", port),
                    "--cluster-announce-ip".to_string(),
                    self.announce.host.clone(),
                ]);
            }
            Launch::ReplicaOf(master) => {
                args.extend([
                    "--replicaof".to_string(),
                    master.host.clone(),
                    master.port.to_string(),
                    "--replica-announce-ip".to_string(),
                    self.announce.host.clone(),
                    "--replica-announce-port".to_string(),
                    port,
                ]);
            }
            Launch::Sentinel(_) => {}
        }

        args
    }

    /// Sentinel refuses to start without a writable config file naming the master.
    fn sentinel_conf(&self, base: Option<&str>, master: &NodeAddr) -> String {
        let mut conf = base.map(|b| format!("{}\n", b.trim_end())).unwrap_or_default();
        conf.push_str(&format!("port {}\n", self.sentinel.listen_port));
        conf.push_str("sentinel resolve-hostnames yes\n");
        conf.push_str("sentinel announce-hostnames yes\n");
        conf.push_str(&format!("sentinel announce-ip {}\n", self.announce.host));
        conf.push_str(&format!(
            "sentinel monitor {} {} {} {}\n",
            self.sentinel.master_name, master.host, master.port, self.sentinel.quorum
        ));
        conf
    }

    async fn write_sentinel_conf(&self, master: &NodeAddr) -> Result<PathBuf, StartupError> {
        let base = match &self.settings.conf {
            Some(path) => Some(
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| StartupError::Spawn(format!("cannot read {}: {}", path.display(), e)))?,
            ),
            None => None,
        };

        let path = std::env::temp_dir().join(format!("sentinel-{}.conf", self.sentinel.listen_port));
        tokio::fs::write(&path, self.sentinel_conf(base.as_deref(), master))
            .await
            .map_err(|e| StartupError::Spawn(format!("cannot write {}: {}", path.display(), e)))?;

        Ok(path)
    }

    async fn launch(&self, launch: Launch) -> Result<(), StartupError> {
        let mut guard = self.child.lock().await;
        if guard.is_some() {
            return Err(StartupError::Spawn("store process already started".to_string()));
        }

        let (args, port) = match &launch {
            Launch::Sentinel(master) => {
                let path = self.write_sentinel_conf(master).await?;
                (
                    vec![path.display().to_string(), "--sentinel".to_string()],
                    self.sentinel.listen_port,
                )
            }
            other => (self.store_args(other), self.announce.port),
        };

        info!("Spawning {} {}", self.settings.server_bin, args.join(" "));
        let child = Command::new(&self.settings.server_bin)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StartupError::Spawn(format!("{}: {}", self.settings.server_bin, e)))?;

        debug!("Store process pid={:?} launched as {:?}", child.id(), launch);
        *guard = Some(child);
        *self.listen_port.write() = Some(port);
        Ok(())
    }

    fn local_target(&self) -> Option<String> {
        self.listen_port.read().map(|port| format!("127.0.0.1:{}", port))
    }

    /// Wait for the child to exit. `None` if nothing was started.
    pub async fn wait(&self) -> std::io::Result<Option<ExitStatus>> {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(child) => {
                let status = child.wait().await?;
                guard.take();
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl NodeProcess for RedisServer {
    async fn start_standalone(&self, mode: StandaloneMode) -> Result<(), StartupError> {
        self.launch(Launch::Standalone(mode)).await
    }

    async fn start_replica_of(&self, master: &NodeAddr) -> Result<(), StartupError> {
        self.launch(Launch::ReplicaOf(master.clone())).await
    }

    async fn start_sentinel_watch(&self, initial_master: &NodeAddr) -> Result<(), StartupError> {
        self.launch(Launch::Sentinel(initial_master.clone())).await
    }

    async fn health_check(&self) -> bool {
        // A child that already exited can never become healthy.
        if let Ok(mut guard) = self.child.try_lock() {
            match guard.as_mut().map(|c| c.try_wait()) {
                Some(Ok(Some(status))) => {
                    warn!("Store process exited with {}", status);
                    return false;
                }
                None => return false,
                _ => {}
            }
        }

        let Some(target) = self.local_target() else {
            return false;
        };
        matches!(
            resp::command(&target, &["PING"], &self.config).await,
            Ok(Reply::Simple(ref pong)) if pong == "PONG"
        )
    }

    async fn shutdown(&self) -> Result<(), StartupError> {
        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else {
            return Ok(());
        };

        if let Some(target) = self.local_target() {
            // The connection drops when the server goes down, so the reply is not meaningful.
            let _ = resp::command(&target, &["SHUTDOWN"], &self.config).await;
        }

        match tokio::time::timeout(self.config.shutdown_grace, child.wait()).await {
            Ok(Ok(status)) => {
                info!("Store process stopped with {}", status);
                Ok(())
            }
            Ok(Err(e)) => Err(StartupError::Exited(e.to_string())),
            Err(_) => {
                warn!("Store process ignored SHUTDOWN, killing it");
                child
                    .kill()
                    .await
                    .map_err(|e| StartupError::Exited(format!("kill failed: {}", e)))
            }
        }
    }
}
