//! Instantiates a concrete `Provider` adapter from an `InternalProviderConfig`.
//! Kept separate from `registry` so the registry itself never has to know
//! about individual backend crates.

use std::sync::Arc;

use mesh_provider::{ContainerDaemonProvider, Provider, ProviderError};
use mesh_util::config::InternalProviderConfig;

#[cfg(feature = "kubernetes")]
use mesh_provider::ClusterOrchestratorProvider;

pub async fn instantiate(
	id: String,
	name: String,
	config: &InternalProviderConfig,
) -> Result<Arc<dyn Provider>, ProviderError> {
	match config {
		InternalProviderConfig::ContainerDaemon { socket_path } => {
			let provider = ContainerDaemonProvider::connect(id, name, socket_path.as_deref()).await?;
			Ok(Arc::new(provider))
		}
		#[cfg(feature = "kubernetes")]
		InternalProviderConfig::ClusterOrchestrator {
			namespace,
			label_selector,
		} => {
			let provider = ClusterOrchestratorProvider::connect(
				id,
				name,
				namespace.clone(),
				label_selector.clone(),
			)
			.await?;
			Ok(Arc::new(provider))
		}
		#[cfg(not(feature = "kubernetes"))]
		InternalProviderConfig::ClusterOrchestrator { .. } => Err(ProviderError::InvalidSpec(
			"cluster-orchestrator provider requires the kubernetes feature".into(),
		)),
		InternalProviderConfig::Mock { total } => Ok(Arc::new(mesh_provider::MockProvider::new(id, name, *total, false))),
	}
}
