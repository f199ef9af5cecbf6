use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use redis_k8s_client::NodeProcess;
use redis_k8s_common::NodeRole;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Health check status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    fn to_http_status(self) -> StatusCode {
        match self {
            HealthStatus::Healthy => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Component health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub timestamp: u64,
}

impl ComponentHealth {
    fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
            timestamp: current_timestamp(),
        }
    }

    fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            timestamp: current_timestamp(),
        }
    }
}

/// Overall health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub role: NodeRole,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentHealth>,
}

/// Readiness check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub timestamp: u64,
    pub checks: Vec<ComponentHealth>,
}

/// Liveness check response (simple)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub alive: bool,
    pub timestamp: u64,
}

/// What the probe handlers look at
#[derive(Clone)]
pub struct HealthState {
    pub process: Arc<dyn NodeProcess>,
    pub role: NodeRole,
}

// Track process start time (global static)
lazy_static::lazy_static! {
    static ref START_TIME: u64 = current_timestamp();
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn uptime_seconds() -> u64 {
    current_timestamp().saturating_sub(*START_TIME)
}

async fn store_check(state: &HealthState) -> ComponentHealth {
    if state.process.health_check().await {
        ComponentHealth::healthy("store")
    } else {
        ComponentHealth::unhealthy("store", "store process does not answer PING")
    }
}

/// Kubernetes liveness probe: the entrypoint is running.
///
/// ```yaml
/// livenessProbe:
///   httpGet:
///     path: /health/live
///     port: 8080
/// ```
#[instrument]
pub async fn health_liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        alive: true,
        timestamp: current_timestamp(),
    })
}

/// Kubernetes readiness probe: the local store answers.
#[instrument(skip(state))]
pub async fn health_readiness(State(state): State<HealthState>) -> (StatusCode, Json<ReadinessResponse>) {
    let store = store_check(&state).await;
    let ready = store.status == HealthStatus::Healthy;
    if !ready {
        warn!("Readiness check failed: store not answering");
    }

    let response = ReadinessResponse {
        ready,
        timestamp: current_timestamp(),
        checks: vec![store],
    };

    (response_status(ready), Json(response))
}

/// Full status for humans and monitoring.
#[instrument(skip(state))]
pub async fn health_check(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let store = store_check(&state).await;
    let status = store.status;

    let response = HealthResponse {
        status,
        role: state.role,
        timestamp: current_timestamp(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime_seconds(),
        components: vec![store],
    };

    (status.to_http_status(), Json(response))
}

fn response_status(ready: bool) -> StatusCode {
    if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

pub fn router(state: HealthState) -> Router {
    lazy_static::initialize(&START_TIME);

    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(health_liveness))
        .route("/health/ready", get(health_readiness))
        .with_state(state)
}

/// Serve the probe endpoints until `cancel` fires.
pub async fn serve(addr: SocketAddr, state: HealthState, cancel: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Health endpoints listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis_k8s_common::{NodeAddr, StandaloneMode, StartupError};

    struct Answering(bool);

    #[async_trait::async_trait]
    impl NodeProcess for Answering {
        async fn start_standalone(&self, _mode: StandaloneMode) -> Result<(), StartupError> {
            Ok(())
        }

        async fn start_replica_of(&self, _master: &NodeAddr) -> Result<(), StartupError> {
            Ok(())
        }

        async fn start_sentinel_watch(&self, _initial_master: &NodeAddr) -> Result<(), StartupError> {
            Ok(())
        }

        async fn health_check(&self) -> bool {
            self.0
        }

        async fn shutdown(&self) -> Result<(), StartupError> {
            Ok(())
        }
    }

    fn state(answering: bool) -> HealthState {
        HealthState {
            process: Arc::new(Answering(answering)),
            role: NodeRole::Slave,
        }
    }

    #[test]
    fn test_health_status_http_codes() {
        assert_eq!(HealthStatus::Healthy.to_http_status(), StatusCode::OK);
        assert_eq!(HealthStatus::Unhealthy.to_http_status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_readiness_follows_store() {
        let (status, Json(body)) = health_readiness(State(state(true))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.ready);

        let (status, Json(body)) = health_readiness(State(state(false))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.ready);
        assert_eq!(body.checks[0].name, "store");
    }

    #[tokio::test]
    async fn test_full_health_reports_role() {
        let (status, Json(body)) = health_check(State(state(true))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.role, NodeRole::Slave);
        assert_eq!(body.components.len(), 1);
    }
}
