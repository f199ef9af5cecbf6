pub mod assembler;
pub mod coordinator;
pub mod discovery;
pub mod health;
pub mod node;
pub mod resolver;
pub mod startup;
pub mod types;

pub use assembler::ClusterAssembler;
pub use coordinator::{BootstrapCoordinator, BootstrapReport};
pub use discovery::DiscoveryClient;
pub use health::HealthChecker;
pub use node::{StartMode, StartedNode};
pub use resolver::resolve;
pub use startup::{plan_start, StartupDriver};
pub use types::*;
