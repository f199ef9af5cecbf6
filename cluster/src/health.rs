use redis_k8s_client::NodeProcess;
use redis_k8s_common::StartupError;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Waits for a freshly spawned store process to answer
pub struct HealthChecker {
    timeout: Duration,
    interval: Duration,
}

impl HealthChecker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            interval: Duration::from_millis(250),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Poll `health_check` until it passes or the timeout runs out.
    pub async fn wait_healthy(
        &self,
        process: &dyn NodeProcess,
        cancel: &CancellationToken,
    ) -> Result<(), StartupError> {
        let started = Instant::now();
        let mut probes = 0u32;

        loop {
            probes += 1;
            if process.health_check().await {
                info!(
                    "Store process healthy after {} ms ({} probes)",
                    started.elapsed().as_millis(),
                    probes
                );
                return Ok(());
            }

            let elapsed = started.elapsed();
            if elapsed >= self.timeout {
                return Err(StartupError::Unhealthy {
                    waited_ms: elapsed.as_millis() as u64,
                });
            }
            debug!("Store process not answering yet (probe {})", probes);

            let wait = self.interval.min(self.timeout - elapsed);
            tokio::select! {
                _ = cancel.cancelled() => return Err(StartupError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}
