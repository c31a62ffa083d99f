//! The Provider capability interface : a single trait object type that the
//! Registry holds values of, regardless of whether the concrete
//! implementation is a local adapter or a remote proxy forwarding to a
//! peer. Placement only ever cares about status, capacity, and deploy.

use async_trait::async_trait;
use err_derive::Error;
use serde::{Deserialize, Serialize};

use mesh_util::data::{Capacity, ContainerSpec, ProviderStatus, ResourceInfo};

/// Failure modes a Provider operation can surface.
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum ProviderError {
	#[error(display = "backend unreachable: {}", _0)]
	BackendUnreachable(String),
	#[error(display = "backend error: {}", _0)]
	BackendError(String),
	#[error(display = "invalid container spec: {}", _0)]
	InvalidSpec(String),
	#[error(display = "quota exceeded")]
	QuotaExceeded,
	#[error(display = "unknown container: {}", _0)]
	UnknownContainer(String),
	#[error(display = "transport failure: {}", _0)]
	Transport(String),
	#[error(display = "remote error: {}", _0)]
	Remote(String),
}

/// Capability set exposed to the Registry. Implementations
/// are: local adapters (`container_daemon`, `cluster_orchestrator`, `mock`)
/// and the Remote Provider proxy (`mesh_rpc::remote_proxy`).
#[async_trait]
pub trait Provider: Send + Sync {
	fn id(&self) -> &str;
	fn name(&self) -> &str;
	fn type_tag(&self) -> &str;

	async fn get_capacity(&self) -> Result<Capacity, ProviderError>;
	async fn get_allocated(&self) -> Result<ResourceInfo, ProviderError>;

	/// Never fails: an unreachable backend is itself a status (Disconnected).
	async fn get_status(&self) -> ProviderStatus;

	async fn last_update_time(&self) -> i64;

	async fn deploy(&self, spec: &ContainerSpec) -> Result<String, ProviderError>;

	/// Ordered list of log lines, most recent last, at most `lines` entries.
	async fn get_logs(&self, container_id: &str, lines: u32) -> Result<Vec<String>, ProviderError>;
}

/// `(container_id, provider_id, spec)`. Owned by the caller that invoked
/// `Deploy`; the Provider itself holds no back-reference to containers it
/// has deployed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRef {
	pub container_id: String,
	pub provider_id: String,
	pub spec: ContainerSpec,
}
