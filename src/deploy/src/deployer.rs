//! The Function Deployer : compiles a `Function` into N
//! replicas, each placed through the Provider Registry and bound to a
//! session the replica's runtime container dials back into.

use std::collections::HashMap;
use std::sync::Arc;

use err_derive::Error;
use tracing::{info, warn};

use mesh_registry::ProviderRegistry;
use mesh_session::{ConnectionManager, Frame};
use mesh_util::data::{ActorInfo, ConnectionId, ContainerSpec, Function, Language, StoreRef};
use mesh_util::error::ControlError;

use crate::routing::{store_alias, RoutingTable};
use crate::stub::Stub;

#[derive(Debug, Clone)]
pub struct DeployerConfig {
	/// language -> container image.
	pub language_images: HashMap<Language, String>,
	/// Externally reachable control-plane dial address, advertised to
	/// runtime containers as `IGNIS_ADDR`.
	pub ignis_addr: String,
	/// Whether a failed replica rolls back previously successful replicas
	/// of the same Function. leaves this as an explicit open
	/// question; default `false` (no rollback, partial success reported).
	pub rollback_on_failure: bool,
}

/// Surfaced to the REST handler on a failed multi-replica deploy : carries how many replicas
/// succeeded before the failure, so the caller can decide on cleanup.
#[derive(Debug, Error)]
#[error(display = "function deployment failed after {} of {} replicas: {}", successful.len(), attempted, cause)]
pub struct DeployError {
	pub cause: ControlError,
	pub successful: Vec<ActorInfo>,
	pub attempted: u32,
}

pub struct Deployer {
	registry: Arc<ProviderRegistry>,
	connections: Arc<ConnectionManager>,
	routing: Arc<RoutingTable>,
	config: DeployerConfig,
}

impl Deployer {
	pub fn new(
		registry: Arc<ProviderRegistry>,
		connections: Arc<ConnectionManager>,
		routing: Arc<RoutingTable>,
		config: DeployerConfig,
	) -> Self {
		Deployer {
			registry,
			connections,
			routing,
			config,
		}
	}

	/// Deploys `function.replicas` replicas for `app_id`, addressed at
	/// `store_ref`. Replicas are deployed sequentially: a replica's session
	/// is created before its own Deploy call, and a parallel implementation
	/// would need to preserve that ordering per replica. Kept sequential
	/// here for simplicity.
	pub async fn deploy(
		&self,
		app_id: &str,
		function: &Function,
		store_ref: StoreRef,
	) -> Result<Vec<ActorInfo>, DeployError> {
		let image = self
			.config
			.language_images
			.get(&function.language)
			.cloned()
			.ok_or_else(|| DeployError {
				cause: ControlError::ConfigError(format!("no image configured for language {:?}", function.language)),
				successful: Vec::new(),
				attempted: function.replicas,
			})?;

		let mut actors = Vec::with_capacity(function.replicas as usize);

		for i in 0..function.replicas {
			match self
				.deploy_one(app_id, function, &image, i, store_ref.clone())
				.await
			{
				Ok(actor_info) => actors.push(actor_info),
				Err(cause) => {
					if self.config.rollback_on_failure {
						warn!(
							"deploy_rollback_on_failure is set, but the Provider capability set \
							exposes no generic Undeploy operation; {} successful \
							replicas of {}:{} are left running",
							actors.len(),
							app_id,
							function.name
						);
					}
					return Err(DeployError {
						cause,
						successful: actors,
						attempted: function.replicas,
					});
				}
			}
		}

		Ok(actors)
	}

	async fn deploy_one(
		&self,
		app_id: &str,
		function: &Function,
		image: &str,
		replica_index: u32,
		store_ref: StoreRef,
	) -> Result<ActorInfo, ControlError> {
		let conn_id = ConnectionId::new(app_id, &function.name, replica_index as usize);
		let session = self.connections.new_session(conn_id.clone());

		session.enqueue_send(Frame::Function {
				name: function.name.clone(),
				params: function.params.clone(),
				requirements: function.requirements,
				pickled_object: function.pickled_object.clone(),
				language: function.language,
		});

		let mut env = HashMap::new();
		env.insert("IGNIS_ADDR".to_string(), self.config.ignis_addr.clone());
		env.insert("CONN_ID".to_string(), conn_id.0.clone());

		let spec = ContainerSpec {
			image: image.to_string(),
			command: Vec::new(),
			ports: Vec::new(),
			env,
			requirements: function.requirements,
		};

		let container_ref = self.registry.deploy(&spec).await?;
		info!(
			"placed replica {} of {}:{} on provider {} (container {})",
			replica_index, app_id, function.name, container_ref.provider_id, container_ref.container_id
		);

		let pid = format!("stub-{}", conn_id);
		let stub = Stub::new(pid.clone(), session.clone());
		self.routing.register(conn_id.0.clone(), stub.clone());
		self.routing.register(store_alias(&conn_id.0), stub);

		self.spawn_recv_drain(conn_id.clone(), session);

		Ok(ActorInfo {
				id: conn_id,
				pid,
				store: store_ref,
		})
	}

	/// Drains the session's receive queue, routing reply-to hints and
	/// forwardable messages within the local routing table.
	fn spawn_recv_drain(&self, conn_id: ConnectionId, session: Arc<mesh_session::Session>) {
		let Some(mut recv_rx) = session.take_receiver() else {
			warn!("session {} receive queue already taken, skipping drain task", conn_id);
			return;
		};
		let routing = self.routing.clone();

		tokio::spawn(async move {
				while let Some(frame) = recv_rx.recv().await {
					match frame {
						Frame::Invoke { target_actor_id,.. } => {
							if let Some(stub) = routing.resolve(&target_actor_id) {
								stub.receive(frame);
							} else {
								warn!("session {}: no route to actor {}", conn_id, target_actor_id);
							}
						}
						Frame::ObjectRequest { request_id,.. } | Frame::ObjectResponse { request_id,.. } => {
							if let Some(stub) = routing.resolve(&store_alias(&conn_id.0)) {
								stub.receive(frame);
							} else {
								warn!(
									"session {}: no store route for request {}",
									conn_id, request_id
								);
							}
						}
						other => {
							// Return, Ack, StreamChunk, InvokeStart terminate at
							// the control plane for this replica; nothing
							// further to route.
							tracing::debug!("session {} received terminal frame {:?}", conn_id, other);
						}
					}
				}
				tracing::debug!("session {} receive drain task ended", conn_id);
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use mesh_registry::ProviderStore;
	use mesh_util::data::ResourceInfo;

	async fn test_deployer(rollback: bool) -> (Deployer, Arc<ProviderRegistry>) {
		let dir = tempfile::tempdir().unwrap();
		let store = ProviderStore::open(&dir.path().join("providers.db")).await.unwrap();
		std::mem::forget(dir);
		let registry = Arc::new(ProviderRegistry::new(store, "127.0.0.1:4000".to_string()));
		registry.set_internal(Arc::new(mesh_provider::MockProvider::new(
					"internal-1".into(),
					"internal".into(),
					ResourceInfo::new(8000, 16 * 1024 * 1024 * 1024, 0),
					true)));

		let mut language_images = HashMap::new();
		language_images.insert(Language::Python, "mesh/python-runtime:latest".to_string());

		let deployer = Deployer::new(
			registry.clone(),
			Arc::new(ConnectionManager::new(8)),
			Arc::new(RoutingTable::new()),
			DeployerConfig {
				language_images,
				ignis_addr: "127.0.0.1:5000".to_string(),
				rollback_on_failure: rollback,
			});
		(deployer, registry)
	}

	fn function(replicas: u32) -> Function {
		Function {
			name: "f".into(),
			params: vec![],
			requirements: ResourceInfo::new(500, 256 * 1024 * 1024, 0),
			pickled_object: vec![9, 9, 9],
			language: Language::Python,
			replicas,
		}
	}

	#[tokio::test]
	async fn deploys_n_replicas_with_distinct_conn_ids() {
		let (deployer, _registry) = test_deployer(false).await;
		let actors = deployer
		.deploy("app1", &function(2), StoreRef("store-1".into()))
		.await
		.unwrap();

		assert_eq!(actors.len(), 2);
		assert_eq!(actors[0].id.0, "app1:f-0");
		assert_eq!(actors[1].id.0, "app1:f-1");
	}

	#[tokio::test]
	async fn missing_image_fails_with_config_error() {
		let (deployer, _registry) = test_deployer(false).await;
		let mut f = function(1);
		f.language = Language::Rust;
		let err = deployer.deploy("app1", &f, StoreRef("s".into())).await.unwrap_err();
		assert!(matches!(err.cause, ControlError::ConfigError(_)));
		assert!(err.successful.is_empty());
	}

	#[tokio::test]
	async fn partial_failure_reports_successful_replicas() {
		let (deployer, _registry) = test_deployer(false).await;
		// Requirements exceed total capacity for every replica beyond the
		// first couple, forcing a placement failure partway through.
		let mut f = function(10);
		f.requirements = ResourceInfo::new(3000, 6 * 1024 * 1024 * 1024, 0);
		let err = deployer.deploy("app1", &f, StoreRef("s".into())).await.unwrap_err();
		assert!(matches!(err.cause, ControlError::ResourceLimitExceeded));
		assert!(!err.successful.is_empty());
		assert!(err.successful.len() < 10);
	}
}
