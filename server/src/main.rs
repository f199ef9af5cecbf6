//! `redis-k8s` container entrypoint

mod console;
mod health;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use redis_k8s_client::{ClientConfig, NodeProcess, RedisClusterControl, RedisServer, SentinelLocator};
use redis_k8s_cluster::{
    resolve, BootstrapCoordinator, ClusterAssembler, ClusterPlan, NodeProbe, StartedNode,
};
use redis_k8s_common::{ClusterState, ConfigError, ExitStatus, NodeConfig};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::health::HealthState;

/// Bootstraps a Redis node inside a Kubernetes pod
#[derive(Parser, Debug)]
#[command(name = "redis-k8s")]
#[command(version, about = "Starts Redis as master, replica, sentinel or cluster member from environment flags")]
struct Args {
    /// Debug-level logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve the role, start the node and supervise it (default)
    Run,
    /// Health check for the redis cluster
    Check {
        /// Print the per-node report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the role the current environment resolves to
    Role,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.verbose, args.quiet);

    let config = match NodeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            console::err(format!("Invalid configuration: {}", e));
            std::process::exit(ExitStatus::ConfigError.code());
        }
    };

    let code = match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Check { json } => check(config, json).await,
        Command::Role => role(&config),
    };

    std::process::exit(code);
}

/// `RUST_LOG` wins over the command-line flags.
fn init_tracing(verbose: bool, quiet: bool) {
    let fallback = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();
}

async fn run(config: NodeConfig) -> i32 {
    let cancel = CancellationToken::new();
    listen_for_signals(cancel.clone());

    let client_config = ClientConfig::default();
    let server = Arc::new(RedisServer::new(&config, client_config.clone()));
    let locator = Arc::new(SentinelLocator::new(
        config.sentinel.master_name.clone(),
        client_config.clone(),
    ));
    let control = Arc::new(RedisClusterControl::new(config.process.cli_bin.clone(), client_config));
    let health_addr = config.health_addr;

    console::step(format!("Bootstrapping node {}", config.announce));
    let coordinator = BootstrapCoordinator::new(config, server.clone(), locator, control, cancel.clone());

    let report = match coordinator.run().await {
        Ok(report) => report,
        Err(e) => {
            console::err(&e);
            return e.exit_status().code();
        }
    };

    console::ok(format!("Node started as {} ({})", report.role, report.node.mode));
    if let Some(formed) = &report.cluster {
        if formed.already_formed {
            console::ok("Cluster was already formed");
        } else {
            console::ok("Cluster created");
        }
    }

    if !report.role.runs_store() {
        return ExitStatus::Started.code();
    }

    if let Some(addr) = health_addr {
        let state = HealthState {
            process: server.clone(),
            role: report.role,
        };
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = health::serve(addr, state, cancel).await {
                error!("Health endpoints stopped: {:#}", e);
            }
        });
    }

    supervise(&server, &report.node, &cancel).await
}

/// Wait for the store to exit on its own, or stop it on a termination signal.
async fn supervise(server: &RedisServer, node: &StartedNode, cancel: &CancellationToken) -> i32 {
    tokio::select! {
        exited = server.wait() => match exited {
            Ok(Some(status)) => {
                let code = status.code().unwrap_or(1);
                console::warning(format!(
                    "Store process exited with {} after {}s",
                    status,
                    node.uptime_seconds()
                ));
                code
            }
            Ok(None) => ExitStatus::Started.code(),
            Err(e) => {
                console::err(format!("Lost track of the store process: {}", e));
                ExitStatus::StartupFailed.code()
            }
        },
        _ = cancel.cancelled() => {
            info!("Stopping store process");
            if let Err(e) = server.shutdown().await {
                warn!("Store shutdown was not clean: {}", e);
            }
            console::ok("Store process stopped");
            ExitStatus::Started.code()
        }
    }
}

fn listen_for_signals(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_termination().await;
        warn!("Termination signal received");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}

/// One line of the `check` report
#[derive(Debug, Serialize)]
struct NodeReport {
    addr: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<ClusterState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn check(config: NodeConfig, json: bool) -> i32 {
    let mut plan = ClusterPlan::from_config(&config);
    if plan.targets.is_empty() {
        console::err(ConfigError::Missing {
            role: "check",
            key: "CLUSTER_NODES or CLUSTER_SERVICE",
        });
        return ExitStatus::ConfigError.code();
    }

    let control = Arc::new(RedisClusterControl::new(
        config.process.cli_bin.clone(),
        ClientConfig::default(),
    ));
    let assembler = ClusterAssembler::new(control, CancellationToken::new());
    if let Err(e) = assembler.poll_round(&mut plan).await {
        console::err(&e);
        return ExitStatus::InsufficientNodes.code();
    }

    let reports: Vec<NodeReport> = plan
        .nodes()
        .map(|(addr, probe)| match probe {
            NodeProbe::Clustered(state) => NodeReport {
                addr: addr.to_string(),
                status: if state.state_ok { "ok" } else { "fail" },
                state: Some(state.clone()),
                error: None,
            },
            NodeProbe::Unassigned => NodeReport {
                addr: addr.to_string(),
                status: "unassigned",
                state: None,
                error: None,
            },
            NodeProbe::Unreachable(reason) => NodeReport {
                addr: addr.to_string(),
                status: "unreachable",
                state: None,
                error: Some(reason.clone()),
            },
        })
        .collect();

    let healthy = plan.reachable() > 0
        && reports
            .iter()
            .filter(|r| r.status != "unreachable")
            .all(|r| r.status == "ok");

    if json {
        match serde_json::to_string_pretty(&reports) {
            Ok(out) => println!("{}", out),
            Err(e) => console::err(format!("Cannot encode report: {}", e)),
        }
    } else {
        for report in &reports {
            match (&report.state, &report.error) {
                (Some(state), _) if state.state_ok => console::ok(format!(
                    "{}: cluster_state:ok, {} slots, {} known nodes",
                    report.addr, state.slots_assigned, state.known_nodes
                )),
                (Some(state), _) => console::warning(format!(
                    "{}: cluster_state:fail, {} slots assigned",
                    report.addr, state.slots_assigned
                )),
                (None, Some(reason)) => console::err(format!("{}: {}", report.addr, reason)),
                (None, None) => console::warning(format!("{}: not part of a cluster", report.addr)),
            }
        }
    }

    if healthy {
        ExitStatus::Started.code()
    } else {
        ExitStatus::InsufficientNodes.code()
    }
}

fn role(config: &NodeConfig) -> i32 {
    match resolve(config).and_then(|role| config.require_for(role).map(|_| role)) {
        Ok(role) => {
            println!("{}", role);
            ExitStatus::Started.code()
        }
        Err(e) => {
            console::err(&e);
            ExitStatus::ConfigError.code()
        }
    }
}
