//! Mock provider, for experimentation and tests.
//!
//! Accepts any spec whose requirements fit current available capacity,
//! tracks allocation in-memory, classifies the request as small/medium/large
//! by CPU threshold, then automatically releases the allocation after a
//! randomized duration drawn from a per-class (min, max) range.
//! `undeploy` cancels the pending release and reclaims immediately.
//!
//! Also implements the Connect -> HealthCheck keepalive protocol by which a process-style provider authenticates inbound calls from
//! the control plane: `connect` binds a control-plane-supplied id;
//! `authenticated_*` calls must carry that id and reject mismatches;
//! `health_check` refreshes a last-seen timestamp, and `expire_stale_binding`
//! (invoked by the Monitor's probe loop) clears the binding once it ages
//! past the configured threshold.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use mesh_util::data::{Capacity, ContainerSpec, ProviderStatus, ResourceInfo};
use mesh_util::time::now_msec;

use crate::provider_trait::{Provider, ProviderError};

/// Threshold above which a request is classified "medium" rather than
/// "small", in CPU millicores.
const SMALL_MEDIUM_THRESHOLD_MC: i64 = 500;
/// Threshold above which a request is classified "large" rather than
/// "medium", in CPU millicores.
const MEDIUM_LARGE_THRESHOLD_MC: i64 = 2000;

/// Auto-release duration ranges, in milliseconds, per size class.
const SMALL_RELEASE_RANGE_MS: (i64, i64) = (2_000, 8_000);
const MEDIUM_RELEASE_RANGE_MS: (i64, i64) = (8_000, 30_000);
const LARGE_RELEASE_RANGE_MS: (i64, i64) = (30_000, 120_000);

/// Keepalive binding goes stale after this many milliseconds without a
/// `health_check`.
const KEEPALIVE_STALE_MS: i64 = 90_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SizeClass {
	Small,
	Medium,
	Large,
}

impl SizeClass {
	fn classify(req: &ResourceInfo) -> SizeClass {
		if req.cpu_millicores <= SMALL_MEDIUM_THRESHOLD_MC {
			SizeClass::Small
		} else if req.cpu_millicores <= MEDIUM_LARGE_THRESHOLD_MC {
			SizeClass::Medium
		} else {
			SizeClass::Large
		}
	}

	fn release_range_ms(&self) -> (i64, i64) {
		match self {
			SizeClass::Small => SMALL_RELEASE_RANGE_MS,
			SizeClass::Medium => MEDIUM_RELEASE_RANGE_MS,
			SizeClass::Large => LARGE_RELEASE_RANGE_MS,
		}
	}
}

struct Allocation {
	requirements: ResourceInfo,
	cancel_release: Option<oneshot::Sender<()>>,
}

struct MockState {
	used: ResourceInfo,
	allocations: HashMap<String, Allocation>,
	bound_provider_id: Option<String>,
	last_keepalive: i64,
}

pub struct MockProvider {
	id: String,
	name: String,
	total: ResourceInfo,
	disable_auto_release: bool,
	state: std::sync::Arc<Mutex<MockState>>,
	last_update: AtomicI64,
}

impl MockProvider {
	pub fn new(id: String, name: String, total: ResourceInfo, disable_auto_release: bool) -> Self {
		MockProvider {
			id,
			name,
			total,
			disable_auto_release,
			state: std::sync::Arc::new(Mutex::new(MockState {
						used: ResourceInfo::ZERO,
						allocations: HashMap::new(),
						bound_provider_id: None,
						last_keepalive: now_msec(),
			})),
			last_update: AtomicI64::new(now_msec()),
		}
	}

	/// Reclaim the allocation for `container_id` immediately and cancel its
	/// pending auto-release, if any.
	pub async fn undeploy(&self, container_id: &str) -> Result<(), ProviderError> {
		let mut state = self.state.lock().await;
		match state.allocations.remove(container_id) {
			Some(alloc) => {
				state.used -= alloc.requirements;
				if let Some(cancel) = alloc.cancel_release {
					let _ = cancel.send(());
				}
				Ok(())
			}
			None => Err(ProviderError::UnknownContainer(container_id.to_string())),
		}
	}

	/// Bind a control-plane-supplied id.
	pub async fn connect(&self, provider_id: &str) {
		let mut state = self.state.lock().await;
		state.bound_provider_id = Some(provider_id.to_string());
		state.last_keepalive = now_msec();
	}

	/// Refresh the keepalive timestamp for a bound id. Rejects mismatched ids with `AuthMismatch`-equivalent.
	pub async fn health_check(&self, provider_id: &str) -> Result<(), ProviderError> {
		let mut state = self.state.lock().await;
		match &state.bound_provider_id {
			Some(bound) if bound == provider_id => {
				state.last_keepalive = now_msec();
				Ok(())
			}
			Some(_) => Err(ProviderError::Remote("provider id mismatch".into())),
			None => Err(ProviderError::Remote("not connected".into())),
		}
	}

	/// Clears the binding once it has aged past the staleness threshold,
	/// requiring a fresh `connect`. Invoked periodically by the Monitor.
	pub async fn expire_stale_binding(&self) {
		let mut state = self.state.lock().await;
		if state.bound_provider_id.is_some()
		&& now_msec() - state.last_keepalive > KEEPALIVE_STALE_MS
		{
			debug!("mock provider {} keepalive expired, clearing binding", self.id);
			state.bound_provider_id = None;
		}
	}

	fn random_release_delay(class: SizeClass) -> Duration {
		let (min, max) = class.release_range_ms();
		let millis = if max > min {
			rand::thread_rng().gen_range(min..max)
		} else {
			min
		};
		Duration::from_millis(millis as u64)
	}
}

#[async_trait]
impl Provider for MockProvider {
	fn id(&self) -> &str {
		&self.id
	}

	fn name(&self) -> &str {
		&self.name
	}

	fn type_tag(&self) -> &str {
		"mock"
	}

	async fn get_capacity(&self) -> Result<Capacity, ProviderError> {
		let state = self.state.lock().await;
		self.last_update.store(now_msec(), Ordering::Relaxed);
		Ok(Capacity::new(self.total, state.used))
	}

	async fn get_allocated(&self) -> Result<ResourceInfo, ProviderError> {
		Ok(self.state.lock().await.used)
	}

	async fn get_status(&self) -> ProviderStatus {
		ProviderStatus::Connected
	}

	async fn last_update_time(&self) -> i64 {
		self.last_update.load(Ordering::Relaxed)
	}

	async fn deploy(&self, spec: &ContainerSpec) -> Result<String, ProviderError> {
		let mut state = self.state.lock().await;
		let available = self.total - state.used;
		if !available.satisfies(&spec.requirements) {
			return Err(ProviderError::QuotaExceeded);
		}

		let container_id = format!("mock-{}", rand_suffix());
		state.used += spec.requirements;

		let cancel_release = if self.disable_auto_release {
			None
		} else {
			let (tx, rx) = oneshot::channel();
			let class = SizeClass::classify(&spec.requirements);
			let delay = Self::random_release_delay(class);
			let state_handle = self.state.clone();
			let released_id = container_id.clone();
			tokio::spawn(async move {
					tokio::select! {
						_ = tokio::time::sleep(delay) => {
							let mut state = state_handle.lock().await;
							if let Some(alloc) = state.allocations.remove(&released_id) {
								state.used -= alloc.requirements;
								debug!("mock allocation {} auto-released after {:?}", released_id, delay);
							}
						}
						_ = rx => {}
					}
			});
			Some(tx)
		};

		state.allocations.insert(
			container_id.clone(),
			Allocation {
				requirements: spec.requirements,
				cancel_release,
			});

		Ok(container_id)
	}

	async fn get_logs(&self, container_id: &str, _lines: u32) -> Result<Vec<String>, ProviderError> {
		let state = self.state.lock().await;
		if state.allocations.contains_key(container_id) {
			Ok(vec![format!("mock container {} has no logs", container_id)])
		} else {
			Err(ProviderError::UnknownContainer(container_id.to_string()))
		}
	}
}

fn rand_suffix() -> String {
	let mut rng = rand::thread_rng();
	(0..10)
	.map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
	.collect::<String>()
	.to_lowercase()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn total() -> ResourceInfo {
		ResourceInfo::new(4000, 8 * 1024 * 1024 * 1024, 0)
	}

	#[tokio::test]
	async fn deploy_rejects_when_unsatisfiable() {
		let provider = MockProvider::new("mock-1".into(), "mock".into(), total(), true);
		let spec = ContainerSpec {
			image: "x".into(),
			command: vec![],
			ports: vec![],
			env: Default::default(),
			requirements: ResourceInfo::new(5000, 0, 0),
		};
		let err = provider.deploy(&spec).await.unwrap_err();
		assert!(matches!(err, ProviderError::QuotaExceeded));
	}

	#[tokio::test]
	async fn undeploy_reclaims_allocation() {
		let provider = MockProvider::new("mock-1".into(), "mock".into(), total(), true);
		let spec = ContainerSpec {
			image: "x".into(),
			command: vec![],
			ports: vec![],
			env: Default::default(),
			requirements: ResourceInfo::new(500, 1024, 0),
		};
		let container_id = provider.deploy(&spec).await.unwrap();
		assert_eq!(provider.get_allocated().await.unwrap(), spec.requirements);

		provider.undeploy(&container_id).await.unwrap();
		assert_eq!(provider.get_allocated().await.unwrap(), ResourceInfo::ZERO);
	}

	#[tokio::test]
	async fn keepalive_binding_rejects_mismatch() {
		let provider = MockProvider::new("mock-1".into(), "mock".into(), total(), true);
		provider.connect("client-a").await;
		assert!(provider.health_check("client-a").await.is_ok());
		assert!(provider.health_check("client-b").await.is_err());
	}

	#[test]
	fn size_class_thresholds() {
		assert_eq!(SizeClass::classify(&ResourceInfo::new(100, 0, 0)), SizeClass::Small);
		assert_eq!(SizeClass::classify(&ResourceInfo::new(1000, 0, 0)), SizeClass::Medium);
		assert_eq!(SizeClass::classify(&ResourceInfo::new(4000, 0, 0)), SizeClass::Large);
	}
}
