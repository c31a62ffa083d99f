//! Remote Provider proxy: a `Provider` implementation that forwards every
//! call to the peer that actually owns the provider. Caches nothing — every
//! inspection is a fresh RPC.

use async_trait::async_trait;

use mesh_provider::{Provider, ProviderError};
use mesh_util::data::{Capacity, ContainerSpec, ProviderStatus, ResourceInfo};

use crate::messages::{CallProviderArgs, PeerRequest, PeerResponse};
use crate::transport::call;

pub struct RemoteProxy {
	id: String,
	name: String,
	type_tag: String,
	peer_address: String,
}

impl RemoteProxy {
	pub fn new(id: String, name: String, type_tag: String, peer_address: String) -> Self {
		RemoteProxy {
			id,
			name,
			type_tag,
			peer_address,
		}
	}

	async fn call_provider(&self, call_args: CallProviderArgs) -> Result<String, ProviderError> {
		let request = PeerRequest::CallProvider {
			provider_id: self.id.clone(),
			call: call_args,
		};
		let response = call(&self.peer_address, &request).await?;
		match response {
			PeerResponse::CallProvider { result } => result.map_err(ProviderError::Remote),
			_ => Err(ProviderError::Transport("unexpected response variant for CallProvider".into())),
		}
	}
}

#[async_trait]
impl Provider for RemoteProxy {
	fn id(&self) -> &str {
		&self.id
	}

	fn name(&self) -> &str {
		&self.name
	}

	fn type_tag(&self) -> &str {
		&self.type_tag
	}

	async fn get_capacity(&self) -> Result<Capacity, ProviderError> {
		let body = self.call_provider(CallProviderArgs::GetCapacity).await?;
		serde_json::from_str(&body).map_err(|e| ProviderError::Remote(e.to_string()))
	}

	async fn get_allocated(&self) -> Result<ResourceInfo, ProviderError> {
		let body = self.call_provider(CallProviderArgs::GetAllocated).await?;
		serde_json::from_str(&body).map_err(|e| ProviderError::Remote(e.to_string()))
	}

	/// Transport failure resolves to `Disconnected` rather than propagating
	/// an error: status is the one Provider method that never fails.
	async fn get_status(&self) -> ProviderStatus {
		match self.call_provider(CallProviderArgs::GetStatus).await {
			Ok(body) => serde_json::from_str(&body).unwrap_or(ProviderStatus::Unknown),
			Err(_) => ProviderStatus::Disconnected,
		}
	}

	/// The proxy holds no cached state, so there is nothing to report a
	/// staleness time against; treat every inspection as current.
	async fn last_update_time(&self) -> i64 {
		mesh_util::time::now_msec()
	}

	async fn deploy(&self, spec: &ContainerSpec) -> Result<String, ProviderError> {
		let body = self
			.call_provider(CallProviderArgs::Deploy { spec: spec.clone() })
			.await?;
		serde_json::from_str(&body).map_err(|e| ProviderError::Remote(e.to_string()))
	}

	async fn get_logs(&self, container_id: &str, lines: u32) -> Result<Vec<String>, ProviderError> {
		let body = self
			.call_provider(CallProviderArgs::GetLogs {
				container_id: container_id.to_string(),
				lines,
			})
			.await?;
		serde_json::from_str(&body).map_err(|e| ProviderError::Remote(e.to_string()))
	}
}
