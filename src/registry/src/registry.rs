//! Provider Registry: three buckets (`internal`, `locally_attached`,
//! `peer_discovered`), the persisted store, and the placement algorithm used
//! by `Deploy`.
//!
//! No lock is held across an I/O call: every method here takes a bucket
//! lock only long enough to clone an `Arc<dyn Provider>` or to mutate the
//! map, then releases it before awaiting anything.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{info, warn};

use mesh_provider::{ContainerRef, Provider, ProviderError};
use mesh_rpc::messages::{CallProviderArgs, ProviderSummary};
use mesh_rpc::peer_manager::DiscoverySink;
use mesh_rpc::server::Dispatch;
use mesh_rpc::RemoteProxy;
use mesh_util::config::InternalProviderConfig;
use mesh_util::data::{Capacity, ContainerSpec, PeerEndpoint, ProviderKind, ProviderStatus, ResourceInfo};
use mesh_util::error::ControlError;

use crate::monitor::HealthSink;
use crate::store::ProviderStore;

/// Coarse cluster-level health classification (see DESIGN.md). `Healthy`
/// means every known provider answers Connected, `Degraded` means some but
/// not all do, `Unavailable` means none do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterHealthStatus {
	Healthy,
	Degraded,
	Unavailable,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ClusterHealth {
	pub status: ClusterHealthStatus,
	pub known_providers: usize,
	pub connected_providers: usize,
	pub capacity: Capacity,
}

fn provider_error_to_control(e: ProviderError) -> ControlError {
	match e {
		ProviderError::BackendUnreachable(m) | ProviderError::Transport(m) => ControlError::BackendUnreachable(m),
		ProviderError::BackendError(m) | ProviderError::Remote(m) => ControlError::DeploymentBackendError(m),
		ProviderError::InvalidSpec(m) => ControlError::ConfigError(m),
		ProviderError::QuotaExceeded => ControlError::ResourceLimitExceeded,
		ProviderError::UnknownContainer(id) => ControlError::ProviderNotFound(id),
	}
}

struct Bucket {
	providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
}

impl Bucket {
	fn new() -> Self {
		Bucket {
			providers: RwLock::new(HashMap::new()),
		}
	}

	fn insert(&self, id: String, provider: Arc<dyn Provider>) {
		self.providers.write().unwrap().insert(id, provider);
	}

	fn remove(&self, id: &str) -> Option<Arc<dyn Provider>> {
		self.providers.write().unwrap().remove(id)
	}

	fn get(&self, id: &str) -> Option<Arc<dyn Provider>> {
		self.providers.read().unwrap().get(id).cloned()
	}

	fn contains(&self, id: &str) -> bool {
		self.providers.read().unwrap().contains_key(id)
	}

	fn snapshot(&self) -> Vec<Arc<dyn Provider>> {
		self.providers.read().unwrap().values().cloned().collect()
	}
}

pub struct ProviderRegistry {
	internal: RwLock<Option<Arc<dyn Provider>>>,
	locally_attached: Bucket,
	peer_discovered: Bucket,
	store: ProviderStore,
	/// Advertised `host:port` this node's peers should dial to reach
	/// locally-owned providers via `CallProvider`.
	advertise_addr: String,
}

impl ProviderRegistry {
	pub fn new(store: ProviderStore, advertise_addr: String) -> Self {
		ProviderRegistry {
			internal: RwLock::new(None),
			locally_attached: Bucket::new(),
			peer_discovered: Bucket::new(),
			store,
			advertise_addr,
		}
	}

	/// Install the node's built-in provider. Internal providers are never
	/// persisted and `UnregisterProvider` refuses to remove them.
	pub fn set_internal(&self, provider: Arc<dyn Provider>) {
		*self.internal.write().unwrap() = Some(provider);
	}

	/// Rehydrate locally-attached providers persisted from a previous run.
	pub async fn rehydrate(&self) -> Result<(), ControlError> {
		let persisted = self
			.store
			.list_all()
			.await
			.map_err(|e| ControlError::BackendUnreachable(e.to_string()))?;

		for p in persisted {
			match crate::factory::instantiate(p.id.clone(), p.name.clone(), &p.config).await {
				Ok(provider) => {
					info!("rehydrated provider {} ({})", p.id, p.type_tag);
					self.locally_attached.insert(p.id.clone(), provider);
					let _ = self.store.update_status(&p.id, ProviderStatus::Connected).await;
				}
				Err(e) => {
					warn!("provider {} failed to rehydrate: {}", p.id, e);
					let _ = self.store.update_status(&p.id, ProviderStatus::Disconnected).await;
				}
			}
		}
		Ok(())
	}

	/// `RegisterProvider`: generate a short unique id, instantiate the
	/// concrete adapter, persist its config, and enroll it.
	pub async fn register_provider(
		&self,
		type_tag: &str,
		name: &str,
		config: InternalProviderConfig,
	) -> Result<String, ControlError> {
		let id = format!("{}-{}", type_tag, nanoid::nanoid!(8));
		let provider = crate::factory::instantiate(id.clone(), name.to_string(), &config)
			.await
			.map_err(provider_error_to_control)?;

		self.store
			.insert(&id, type_tag, name, &config, ProviderStatus::Connected)
			.await
			.map_err(|e| ControlError::BackendUnreachable(e.to_string()))?;

		self.locally_attached.insert(id.clone(), provider);
		info!("registered provider {}", id);
		Ok(id)
	}

	/// `UnregisterProvider`. A no-op with a warning if `id` refers to the
	/// internal provider.
	pub async fn unregister_provider(&self, id: &str) {
		if let Some(internal) = self.internal.read().unwrap().as_ref() {
			if internal.id() == id {
				warn!("refusing to unregister the internal provider {}", id);
				return;
			}
		}

		if self.locally_attached.remove(id).is_some() {
			if let Err(e) = self.store.delete(id).await {
				warn!("failed to delete persisted provider {}: {}", id, e);
			}
			return;
		}
		self.peer_discovered.remove(id);
	}

	/// `GetCapacity`: sum across all three buckets, best effort — a
	/// provider error is logged and that provider's slice is dropped from
	/// the total.
	pub async fn get_capacity(&self) -> Capacity {
		let mut providers = Vec::new();
		if let Some(p) = self.internal.read().unwrap().clone() {
			providers.push(p);
		}
		providers.extend(self.locally_attached.snapshot());
		providers.extend(self.peer_discovered.snapshot());

		let mut total = Capacity::zero();
		for p in providers {
			match p.get_capacity().await {
				Ok(c) => total += c,
				Err(e) => warn!("provider {} capacity query failed: {}", p.id(), e),
			}
		}
		total
	}

	/// All providers currently known, across all three buckets, tagged with
	/// which bucket they live in.
	pub fn list_providers(&self) -> Vec<(ProviderKind, Arc<dyn Provider>)> {
		let mut out = Vec::new();
		if let Some(p) = self.internal.read().unwrap().clone() {
			out.push((ProviderKind::Internal, p));
		}
		for p in self.locally_attached.snapshot() {
			out.push((ProviderKind::LocallyAttached, p));
		}
		for p in self.peer_discovered.snapshot() {
			out.push((ProviderKind::PeerDiscovered, p));
		}
		out
	}

	/// `Deploy`: first-fit placement, locally-attached (with the internal
	/// provider iterated first) then peer-discovered.
	pub async fn deploy(&self, spec: &ContainerSpec) -> Result<ContainerRef, ControlError> {
		let mut candidates = Vec::new();
		if let Some(p) = self.internal.read().unwrap().clone() {
			candidates.push(p);
		}
		candidates.extend(self.locally_attached.snapshot());
		candidates.extend(self.peer_discovered.snapshot());

		for p in candidates {
			if p.get_status().await != ProviderStatus::Connected {
				continue;
			}
			let capacity = match p.get_capacity().await {
				Ok(c) => c,
				Err(e) => {
					warn!("provider {} capacity query failed during placement: {}", p.id(), e);
					continue;
				}
			};
			if !capacity.available.satisfies(&spec.requirements) {
				continue;
			}

			let container_id = p
				.deploy(spec)
				.await
				.map_err(|e| ControlError::DeploymentBackendError(e.to_string()))?;
			return Ok(ContainerRef {
				container_id,
				provider_id: p.id().to_string(),
				spec: spec.clone(),
			});
		}

		Err(ControlError::ResourceLimitExceeded)
	}

	/// `HandleProviderFailure` / `HandleProviderRecovery`, invoked by the
	/// Monitor. Recording is limited to the persisted status column;
	/// eligibility itself is governed live by each provider's own
	/// `get_status()`, so there is nothing further to flip here for
	/// in-memory buckets.
	pub async fn handle_provider_failure(&self, id: &str) {
		warn!("provider {} marked unhealthy by the monitor", id);
		if self.locally_attached.contains(id) {
			let _ = self.store.update_status(id, ProviderStatus::Disconnected).await;
		}
	}

	pub async fn handle_provider_recovery(&self, id: &str) {
		info!("provider {} recovered", id);
		if self.locally_attached.contains(id) {
			let _ = self.store.update_status(id, ProviderStatus::Connected).await;
		}
	}

	/// Read-only snapshot: a coarse healthy/degraded/unavailable
	/// classification over every enrolled provider, used by the CLI
	/// `status` subcommand and the REST façade's health endpoint. See
	/// DESIGN.md.
	pub async fn cluster_health(&self) -> ClusterHealth {
		let providers = self.list_providers();
		let known = providers.len();
		let mut connected = 0;
		for (_, p) in &providers {
			if p.get_status().await == ProviderStatus::Connected {
				connected += 1;
			}
		}

		let status = if known == 0 || connected == known {
			ClusterHealthStatus::Healthy
		} else if connected > 0 {
			ClusterHealthStatus::Degraded
		} else {
			ClusterHealthStatus::Unavailable
		};

		ClusterHealth {
			status,
			known_providers: known,
			connected_providers: connected,
			capacity: self.get_capacity().await,
		}
	}

	fn local_summaries(&self) -> Vec<ProviderSummary> {
		let (host, port) = split_host_port(&self.advertise_addr);
		let mut out = Vec::new();

		let mut push = |id: &str, name: &str, type_tag: &str, status: ProviderStatus| {
			out.push(ProviderSummary {
				id: id.to_string(),
				name: name.to_string(),
				type_tag: type_tag.to_string(),
				host: host.clone(),
				port,
				status,
				peer_address: String::new(),
			});
		};

		// Status lookups below are best-effort synchronous snapshots; a
		// live status check would require async, which `push` (a plain
		// closure) cannot perform, so discovered entries are marked
		// Unknown and left for the caller to probe if it cares.
		if let Some(p) = self.internal.read().unwrap().as_ref() {
			push(p.id(), p.name(), p.type_tag(), ProviderStatus::Unknown);
		}
		for p in self.locally_attached.snapshot() {
			push(p.id(), p.name(), p.type_tag(), ProviderStatus::Unknown);
		}
		out
	}
}

fn split_host_port(addr: &str) -> (String, u16) {
	match addr.rsplit_once(':') {
		Some((host, port)) => (host.to_string(), port.parse().unwrap_or(0)),
		None => (addr.to_string(), 0),
	}
}

#[async_trait]
impl Dispatch for ProviderRegistry {
	async fn exchange_peers(&self, _known: Vec<PeerEndpoint>) -> Vec<PeerEndpoint> {
		// The peer set itself lives in `PeerManager`, owned by the node
		// binary; this impl only ever answers `CallProvider` and
		// `ExchangeProviders`, with `ExchangePeers` wired directly at the
		// node layer where both the registry and the peer manager are in
		// scope. See `mesh_node`.
		Vec::new()
	}

	async fn exchange_providers(&self, _providers: Vec<ProviderSummary>) -> Vec<ProviderSummary> {
		self.local_summaries()
	}

	async fn call_provider(&self, provider_id: &str, call: CallProviderArgs) -> Result<String, String> {
		// Resolve only internal/locally-attached providers. Never forward
		// to a peer-discovered proxy: that would let two nodes loop
		// indefinitely.
		let provider = if let Some(p) = self.internal.read().unwrap().as_ref() {
			if p.id() == provider_id {
				Some(p.clone())
			} else {
				None
			}
		} else {
			None
		}
		.or_else(|| self.locally_attached.get(provider_id));

		let Some(provider) = provider else {
			return Err(format!("unknown provider: {}", provider_id));
		};

		dispatch_call(provider.as_ref(), call).await
	}
}

async fn dispatch_call(provider: &dyn Provider, call: CallProviderArgs) -> Result<String, String> {
	let result = match call {
		CallProviderArgs::GetCapacity => provider
			.get_capacity()
			.await
			.map(|c| serde_json::to_string(&c).unwrap()),
		CallProviderArgs::GetAllocated => provider
			.get_allocated()
			.await
			.map(|r| serde_json::to_string(&r).unwrap()),
		CallProviderArgs::GetStatus => {
			let status = provider.get_status().await;
			Ok(serde_json::to_string(&status).unwrap())
		}
		CallProviderArgs::Deploy { spec } => provider
			.deploy(&spec)
			.await
			.map(|id| serde_json::to_string(&id).unwrap()),
		CallProviderArgs::GetLogs { container_id, lines } => provider
			.get_logs(&container_id, lines)
			.await
			.map(|lines| serde_json::to_string(&lines).unwrap()),
	};
	result.map_err(|e| e.to_string())
}

#[async_trait]
impl HealthSink for ProviderRegistry {
	async fn handle_provider_failure(&self, id: &str) {
		ProviderRegistry::handle_provider_failure(self, id).await
	}

	async fn handle_provider_recovery(&self, id: &str) {
		ProviderRegistry::handle_provider_recovery(self, id).await
	}
}

#[async_trait]
impl DiscoverySink for ProviderRegistry {
	async fn knows_provider(&self, id: &str) -> bool {
		if let Some(p) = self.internal.read().unwrap().as_ref() {
			if p.id() == id {
				return true;
			}
		}
		self.locally_attached.contains(id) || self.peer_discovered.contains(id)
	}

	async fn register_discovered(&self, summary: ProviderSummary, peer_address: String) {
		// Duplicate provider id across gossip: keep the existing entry,
		// drop the new one.
		if self.peer_discovered.contains(&summary.id) {
			return;
		}
		let proxy = RemoteProxy::new(summary.id.clone(), summary.name, summary.type_tag, peer_address);
		self.peer_discovered.insert(summary.id.clone(), Arc::new(proxy));
		info!("registered discovered provider {}", summary.id);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use mesh_provider::MockProvider;

	async fn test_registry() -> ProviderRegistry {
		let dir = tempfile::tempdir().unwrap();
		let store = ProviderStore::open(&dir.path().join("providers.db")).await.unwrap();
		// Keep the tempdir alive for the registry's lifetime by leaking it;
		// acceptable in a short-lived unit test.
		std::mem::forget(dir);
		ProviderRegistry::new(store, "127.0.0.1:4000".to_string())
	}

	#[tokio::test]
	async fn deploy_picks_first_satisfying_provider() {
		let registry = test_registry().await;
		let total = ResourceInfo::new(4000, 8 * 1024 * 1024 * 1024, 0);
		registry.set_internal(Arc::new(MockProvider::new(
			"internal-1".into(),
			"internal".into(),
			total,
			true)));

		let spec = ContainerSpec {
			image: "x".into(),
			command: vec![],
			ports: vec![],
			env: Default::default(),
			requirements: ResourceInfo::new(500, 1024, 0),
		};
		let container_ref = registry.deploy(&spec).await.unwrap();
		assert_eq!(container_ref.provider_id, "internal-1");
	}

	#[tokio::test]
	async fn deploy_fails_when_nothing_satisfies() {
		let registry = test_registry().await;
		let spec = ContainerSpec {
			image: "x".into(),
			command: vec![],
			ports: vec![],
			env: Default::default(),
			requirements: ResourceInfo::new(500, 1024, 0),
		};
		let err = registry.deploy(&spec).await.unwrap_err();
		assert!(matches!(err, ControlError::ResourceLimitExceeded));
	}

	#[tokio::test]
	async fn unregister_protects_internal_provider() {
		let registry = test_registry().await;
		registry.set_internal(Arc::new(MockProvider::new(
			"internal-1".into(),
			"internal".into(),
			ResourceInfo::ZERO,
			true)));
		registry.unregister_provider("internal-1").await;
		assert!(registry.internal.read().unwrap().is_some());
	}

	#[tokio::test]
	async fn register_discovered_keeps_existing_on_duplicate() {
		let registry = test_registry().await;
		let summary = ProviderSummary {
			id: "docker-abc".into(),
			name: "first".into(),
			type_tag: "container-daemon".into(),
			host: "10.0.0.1".into(),
			port: 4000,
			status: ProviderStatus::Unknown,
			peer_address: "10.0.0.1:4000".into(),
		};
		registry.register_discovered(summary.clone(), "10.0.0.1:4000".into()).await;
		let mut dup = summary;
		dup.name = "second".into();
		registry.register_discovered(dup, "10.0.0.2:4000".into()).await;

		let providers = registry.list_providers();
		let matches: Vec<_> = providers
			.iter()
			.filter(|(_, p)| p.id() == "docker-abc")
			.collect();
		assert_eq!(matches.len(), 1);
		assert_eq!(matches[0].1.name(), "first");
	}
}
