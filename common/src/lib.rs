pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use crate::config::{AnnounceSource, NodeConfig};
pub use error::{
    BootstrapError, ClusterError, ConfigError, DiscoveryError, ExitStatus, Result, StartupError,
};
pub use retry::{Admission, Cancelled, RetryBudget, RetryPolicy};
pub use types::*;
