use std::time::Duration;

/// Timeouts for talking to store and sentinel endpoints
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    /// How long `shutdown` waits for the process to exit before killing it
    pub shutdown_grace: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
            command_timeout: Duration::from_millis(1000),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}
