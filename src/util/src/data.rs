//! Core data model shared by every component.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// `(cpu_millicores, memory_bytes, gpu_count)`. Addition and subtraction are
/// component-wise; a request is *satisfied* by an availability iff all three
/// components of the availability are greater than or equal to the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceInfo {
	pub cpu_millicores: i64,
	pub memory_bytes: i64,
	pub gpu_count: i64,
}

impl ResourceInfo {
	pub const ZERO: ResourceInfo = ResourceInfo {
		cpu_millicores: 0,
		memory_bytes: 0,
		gpu_count: 0,
	};

	pub fn new(cpu_millicores: i64, memory_bytes: i64, gpu_count: i64) -> Self {
		ResourceInfo {
			cpu_millicores,
			memory_bytes,
			gpu_count,
		}
	}

	/// Whether `self`, taken as an availability, satisfies a request `req`.
	pub fn satisfies(&self, req: &ResourceInfo) -> bool {
		self.cpu_millicores >= req.cpu_millicores
			&& self.memory_bytes >= req.memory_bytes
			&& self.gpu_count >= req.gpu_count
	}
}

impl std::ops::Add for ResourceInfo {
	type Output = ResourceInfo;
	fn add(self, rhs: ResourceInfo) -> ResourceInfo {
		ResourceInfo {
			cpu_millicores: self.cpu_millicores + rhs.cpu_millicores,
			memory_bytes: self.memory_bytes + rhs.memory_bytes,
			gpu_count: self.gpu_count + rhs.gpu_count,
		}
	}
}

impl std::ops::Sub for ResourceInfo {
	type Output = ResourceInfo;
	fn sub(self, rhs: ResourceInfo) -> ResourceInfo {
		ResourceInfo {
			cpu_millicores: self.cpu_millicores - rhs.cpu_millicores,
			memory_bytes: self.memory_bytes - rhs.memory_bytes,
			gpu_count: self.gpu_count - rhs.gpu_count,
		}
	}
}

impl std::ops::AddAssign for ResourceInfo {
	fn add_assign(&mut self, rhs: ResourceInfo) {
		*self = *self + rhs;
	}
}

impl std::ops::SubAssign for ResourceInfo {
	fn sub_assign(&mut self, rhs: ResourceInfo) {
		*self = *self - rhs;
	}
}

/// `(total, used, available)`, invariant `total = used + available`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Capacity {
	pub total: ResourceInfo,
	pub used: ResourceInfo,
	pub available: ResourceInfo,
}

impl Capacity {
	pub fn new(total: ResourceInfo, used: ResourceInfo) -> Self {
		Capacity {
			total,
			used,
			available: total - used,
		}
	}

	pub fn zero() -> Self {
		Capacity::default()
	}
}

impl std::ops::Add for Capacity {
	type Output = Capacity;
	fn add(self, rhs: Capacity) -> Capacity {
		Capacity {
			total: self.total + rhs.total,
			used: self.used + rhs.used,
			available: self.available + rhs.available,
		}
	}
}

impl std::ops::AddAssign for Capacity {
	fn add_assign(&mut self, rhs: Capacity) {
		*self = *self + rhs;
	}
}

/// Health status of a provider; only `Connected` providers are eligible for
/// placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderStatus {
	Unknown,
	Connected,
	Disconnected,
}

impl ProviderStatus {
	pub fn is_eligible(&self) -> bool {
		matches!(self, ProviderStatus::Connected)
	}
}

impl fmt::Display for ProviderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ProviderStatus::Unknown => "unknown",
			ProviderStatus::Connected => "connected",
			ProviderStatus::Disconnected => "disconnected",
		};
		write!(f, "{}", s)
	}
}

/// Which bucket of the registry a provider lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
	/// Spawned by the node itself from local configuration; cannot be
	/// unregistered.
	Internal,
	/// Registered through the REST façade, persisted in the node's
	/// provider store, rehydrated at boot.
	LocallyAttached,
	/// Learned through gossip; stored in memory only.
	PeerDiscovered,
}

/// A container image, command, ports, env vars, and resource needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
	pub image: String,
	#[serde(default)]
	pub command: Vec<String>,
	#[serde(default)]
	pub ports: Vec<u16>,
	#[serde(default)]
	pub env: HashMap<String, String>,
	pub requirements: ResourceInfo,
}

/// Address string of a peer, in `host:port` form. Identity is the address
/// itself; the peer set is a mathematical set (insertion is idempotent).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerEndpoint(pub String);

impl fmt::Display for PeerEndpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<String> for PeerEndpoint {
	fn from(s: String) -> Self {
		PeerEndpoint(s)
	}
}

impl From<&str> for PeerEndpoint {
	fn from(s: &str) -> Self {
		PeerEndpoint(s.to_string())
	}
}

/// `"<app-id>:<function-name>-<replica-index>"`, unique within a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub String);

impl ConnectionId {
	pub fn new(app_id: &str, function_name: &str, replica_index: usize) -> Self {
		ConnectionId(format!("{}:{}-{}", app_id, function_name, replica_index))
	}
}

impl fmt::Display for ConnectionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Per-provider health bookkeeping maintained by the Monitor. `healthy`
/// implies `consecutive_failures < max_failures`.
#[derive(Debug, Clone)]
pub struct HealthCheckRecord {
	pub last_successful_check_time: Option<i64>,
	pub consecutive_failures: u32,
	pub healthy: bool,
	pub max_failures: u32,
}

impl HealthCheckRecord {
	pub fn new(max_failures: u32) -> Self {
		HealthCheckRecord {
			last_successful_check_time: None,
			consecutive_failures: 0,
			healthy: true,
			max_failures,
		}
	}

	/// Record a successful probe. Returns `true` if this probe transitioned
	/// the provider from unhealthy back to healthy.
	pub fn record_success(&mut self, now_msec: i64) -> bool {
		self.last_successful_check_time = Some(now_msec);
		self.consecutive_failures = 0;
		let recovered = !self.healthy;
		self.healthy = true;
		recovered
	}

	/// Record a failed probe. Returns `true` if this probe transitioned the
	/// provider from healthy to unhealthy.
	pub fn record_failure(&mut self) -> bool {
		self.consecutive_failures += 1;
		if self.healthy && self.consecutive_failures >= self.max_failures {
			self.healthy = false;
			return true;
		}
		false
	}
}

/// Language of the user-supplied function body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
	Python,
	Javascript,
	Rust,
	Go,
}

/// The user-submitted unit of work: immutable once submitted. `replicas`
/// says how many identical runtime instances the Function Deployer must
/// provision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
	pub name: String,
	pub params: Vec<String>,
	pub requirements: ResourceInfo,
	#[serde(with = "serde_bytes")]
	pub pickled_object: Vec<u8>,
	pub language: Language,
	pub replicas: u32,
}

/// Opaque handle a function uses to address a data-store peer. Never
/// interpreted by this subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRef(pub String);

/// `(id, pid, store)` returned to the caller of the Function Deployer, one
/// per replica. Also carried on the wire inside the `InvokeStart` session
/// frame, which is why it lives in the shared data model rather than in the
/// deploy crate alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorInfo {
	/// The connection-id this replica's session is keyed by.
	pub id: ConnectionId,
	/// Identity of the local Stub actor that routes messages to the
	/// runtime container via its session.
	pub pid: String,
	pub store: StoreRef,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn resource_satisfies_is_componentwise() {
		let avail = ResourceInfo::new(500, 1024, 0);
		assert!(avail.satisfies(&ResourceInfo::new(500, 1024, 0)));
		assert!(avail.satisfies(&ResourceInfo::ZERO));
		assert!(!avail.satisfies(&ResourceInfo::new(501, 0, 0)));
		assert!(!avail.satisfies(&ResourceInfo::new(0, 0, 1)));
	}

	#[test]
	fn capacity_invariant_holds_after_construction() {
		let cap = Capacity::new(ResourceInfo::new(8000, 16 * 1024 * 1024 * 1024, 0), ResourceInfo::new(1000, 512 * 1024 * 1024, 0));
		assert_eq!(cap.total, cap.used + cap.available);
	}

	#[test]
	fn health_record_transitions_at_max_failures() {
		let mut hc = HealthCheckRecord::new(3);
		assert!(!hc.record_failure());
		assert!(!hc.record_failure());
		assert!(hc.record_failure());
		assert!(!hc.healthy);
		assert!(hc.record_success(1));
		assert!(hc.healthy);
	}

	#[test]
	fn max_failures_minus_one_then_success_stays_healthy() {
		let mut hc = HealthCheckRecord::new(3);
		assert!(!hc.record_failure());
		assert!(!hc.record_failure());
		assert!(hc.record_success(42));
		assert!(hc.healthy);
		assert_eq!(hc.consecutive_failures, 0);
	}
}
