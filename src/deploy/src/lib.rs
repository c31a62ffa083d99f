//! Function Deployment Pipeline : compiles a user-submitted
//! `Function` into N provisioned replicas, each with a durable bidirectional
//! session to the runtime container it spawned.

pub mod deployer;
pub mod routing;
pub mod stub;

pub use deployer::{DeployError, Deployer, DeployerConfig};
pub use routing::RoutingTable;
pub use stub::Stub;
