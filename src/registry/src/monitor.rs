//! Provider Monitor : a background loop that probes every
//! enrolled provider on a fixed period and flips health state via two
//! narrow callbacks into the Registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use mesh_provider::Provider;
use mesh_util::background::CancelToken;
use mesh_util::data::{HealthCheckRecord, ProviderStatus};
use mesh_util::time::now_msec;

/// The two callbacks the monitor needs; implemented by `ProviderRegistry`
/// but expressed narrowly here so this module never needs the registry's
/// full API.
#[async_trait::async_trait]
pub trait HealthSink: Send + Sync {
	async fn handle_provider_failure(&self, id: &str);
	async fn handle_provider_recovery(&self, id: &str);
}

pub struct ProviderMonitor {
	max_failures: u32,
	records: Mutex<HashMap<String, HealthCheckRecord>>,
}

impl ProviderMonitor {
	pub fn new(max_failures: u32) -> Self {
		ProviderMonitor {
			max_failures,
			records: Mutex::new(HashMap::new()),
		}
	}

	/// Run one probe pass over `providers`, reporting transitions to
	/// `sink`. `providers` is a snapshot taken by the caller; the monitor
	/// itself holds no reference to the registry's buckets.
	pub async fn probe_once(&self, providers: &[Arc<dyn Provider>], sink: &dyn HealthSink) {
		for provider in providers {
			let healthy = provider.get_status().await == ProviderStatus::Connected;
			let transition = {
				let mut records = self.records.lock().unwrap();
				let record = records
					.entry(provider.id().to_string())
					.or_insert_with(|| HealthCheckRecord::new(self.max_failures));
				if healthy {
					let recovered = record.record_success(now_msec());
					if recovered {
						Some(true)
					} else {
						None
					}
				} else {
					let failed = record.record_failure();
					if failed {
						Some(false)
					} else {
						None
					}
				}
			};

			match transition {
				Some(true) => sink.handle_provider_recovery(provider.id()).await,
				Some(false) => sink.handle_provider_failure(provider.id()).await,
				None => debug!("provider {} probe: healthy={}", provider.id(), healthy),
			}
		}
	}

	/// Drop bookkeeping for a provider that has been unregistered, so a
	/// later id reuse (e.g. after a restart) starts with a clean slate.
	pub fn forget(&self, id: &str) {
		self.records.lock().unwrap().remove(id);
	}

	/// Run `probe_once` on a fixed period until `cancel` fires.
	pub async fn run<F>(&self, period: Duration, cancel: CancelToken, snapshot: F, sink: Arc<dyn HealthSink>)
	where
		F: Fn() -> Vec<Arc<dyn Provider>>,
	{
		mesh_util::background::run_periodic(period, cancel, || {
			let providers = snapshot();
			let sink = sink.clone();
			async move {
				self.probe_once(&providers, sink.as_ref()).await;
			}
		})
		.await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use mesh_provider::MockProvider;
	use mesh_util::data::ResourceInfo;
	use std::sync::atomic::{AtomicUsize, Ordering};

	struct CountingSink {
		failures: AtomicUsize,
		recoveries: AtomicUsize,
	}

	#[async_trait::async_trait]
	impl HealthSink for CountingSink {
		async fn handle_provider_failure(&self, _id: &str) {
			self.failures.fetch_add(1, Ordering::SeqCst);
		}
		async fn handle_provider_recovery(&self, _id: &str) {
			self.recoveries.fetch_add(1, Ordering::SeqCst);
		}
	}

	#[tokio::test]
	async fn healthy_mock_provider_never_trips_failure() {
		let monitor = ProviderMonitor::new(3);
		let sink = CountingSink {
			failures: AtomicUsize::new(0),
			recoveries: AtomicUsize::new(0),
		};
		let provider: Arc<dyn Provider> = Arc::new(MockProvider::new(
				"mock-1".into(),
				"mock".into(),
				ResourceInfo::ZERO,
				true));

		for _ in 0..5 {
			monitor.probe_once(&[provider.clone()], &sink).await;
		}

		assert_eq!(sink.failures.load(Ordering::SeqCst), 0);
	}
}
