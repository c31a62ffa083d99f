//! Node configuration, loaded from a TOML file and overridable by
//! environment variables / CLI flags for secrets via a `Secrets` /
//! `fill_secrets` pattern.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorContext};

fn default_gossip_interval_secs() -> u64 {
	30
}

fn default_monitor_interval_secs() -> u64 {
	30
}

fn default_monitor_max_failures() -> u32 {
	3
}

fn default_session_queue_capacity() -> usize {
	64
}

fn default_rpc_timeout_msec() -> u64 {
	30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	/// Address this node's peer RPC server binds to.
	pub rpc_bind_addr: SocketAddr,
	/// Address this node's peer RPC server is reachable at by other nodes,
	/// if different from `rpc_bind_addr` (e.g. behind NAT).
	pub rpc_public_addr: Option<SocketAddr>,
	/// Address of the bidirectional streaming server that runtime
	/// containers dial back to. Advertised to runtime containers as
	/// `IGNIS_ADDR`.
	pub session_bind_addr: SocketAddr,
	pub session_public_addr: Option<SocketAddr>,
	/// Address the REST façade binds to.
	pub rest_bind_addr: SocketAddr,

	/// Peers to contact at startup.
	#[serde(default)]
	pub bootstrap_peers: Vec<String>,

	#[serde(default = "default_gossip_interval_secs")]
	pub gossip_interval_secs: u64,
	#[serde(default = "default_monitor_interval_secs")]
	pub monitor_interval_secs: u64,
	#[serde(default = "default_monitor_max_failures")]
	pub monitor_max_failures: u32,
	#[serde(default = "default_session_queue_capacity")]
	pub session_queue_capacity: usize,
	#[serde(default = "default_rpc_timeout_msec")]
	pub rpc_timeout_msec: u64,

	/// language -> container image, used by the Function Deployer.
	#[serde(default)]
	pub language_images: HashMap<String, String>,

	/// Directory holding the persisted locally-attached provider store
	/// (a SQLite database) and other node metadata.
	pub metadata_dir: PathBuf,

	/// Configuration for the node's own built-in provider, if any.
	#[serde(default)]
	pub internal_provider: Option<InternalProviderConfig>,

	/// Whether a failed replica mid-deploy rolls back previously
	/// successful replicas of the same Function. leaves this
	/// as an open question; we make it an explicit, defaulted option.
	#[serde(default)]
	pub deploy_rollback_on_failure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InternalProviderConfig {
	ContainerDaemon { socket_path: Option<String> },
	ClusterOrchestrator { namespace: String, label_selector: String },
	Mock { total: crate::data::ResourceInfo },
}

pub fn read_config<P: AsRef<Path>>(path: P) -> Result<Config, Error> {
	let path = path.as_ref();
	let data = std::fs::read_to_string(path)
	.err_context(format!("unable to read config file {}", path.display()))?;
	let config: Config =
	toml::from_str(&data).err_context(format!("unable to parse config file {}", path.display()))?;
	Ok(config)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_minimal_config() {
		let toml_str = r#"
			rpc_bind_addr = "127.0.0.1:3901"
			session_bind_addr = "127.0.0.1:3902"
			rest_bind_addr = "127.0.0.1:3903"
			metadata_dir = "/tmp/mesh-node"
		"#;
		let config: Config = toml::from_str(toml_str).unwrap();
		assert_eq!(config.gossip_interval_secs, 30);
		assert_eq!(config.monitor_max_failures, 3);
		assert!(config.bootstrap_peers.is_empty());
	}
}
