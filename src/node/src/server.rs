//! Boots one node: opens the persisted provider store, instantiates the
//! configured internal provider, rehydrates locally-attached providers,
//! then runs the gossip loop, the provider monitor, the peer RPC server,
//! the session server, and the REST façade side by side until cancelled.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use mesh_deploy::{Deployer, DeployerConfig, RoutingTable};
use mesh_registry::{ProviderMonitor, ProviderRegistry, ProviderStore};
use mesh_rpc::server::Dispatch;
use mesh_rpc::{PeerManager, RpcServer};
use mesh_session::{ConnectionManager, SessionServer};
use mesh_util::background::cancel_pair;
use mesh_util::data::Language;
use mesh_util::error::{Error, ErrorContext};

use crate::rest::RestServer;
use crate::state::{NodeDispatch, NodeState};

fn parse_language_images(raw: &HashMap<String, String>) -> HashMap<Language, String> {
	let mut out = HashMap::new();
	for (key, image) in raw {
		match serde_json::from_value::<Language>(serde_json::Value::String(key.clone())) {
			Ok(lang) => {
				out.insert(lang, image.clone());
			}
			Err(_) => warn!("ignoring language_images entry with unknown language {:?}", key),
		}
	}
	out
}

pub async fn run_server(config_file: PathBuf) -> Result<(), Error> {
	let config = mesh_util::config::read_config(&config_file)
		.err_context(format!("loading config file {}", config_file.display()))?;

	std::fs::create_dir_all(&config.metadata_dir)
		.err_context(format!("creating metadata dir {}", config.metadata_dir.display()))?;

	let store = ProviderStore::open(&config.metadata_dir.join("providers.db"))
		.await
		.err_context("opening provider store")?;

	let advertise_addr = config
		.rpc_public_addr
		.map(|a| a.to_string())
		.unwrap_or_else(|| config.rpc_bind_addr.to_string());
	let registry = Arc::new(ProviderRegistry::new(store, advertise_addr));

	if let Some(internal_config) = &config.internal_provider {
		match mesh_registry::instantiate("internal".to_string(), "internal".to_string(), internal_config).await {
			Ok(provider) => registry.set_internal(provider),
			Err(e) => warn!("failed to start configured internal provider: {}", e),
		}
	}

	registry
		.rehydrate()
		.await
		.map_err(|e| Error::Message(format!("rehydrating locally-attached providers: {}", e)))?;

	let peers = Arc::new(PeerManager::new());
	peers.add_many(config.bootstrap_peers.iter().cloned().map(Into::into));

	let connections = Arc::new(ConnectionManager::new(config.session_queue_capacity));
	let routing = Arc::new(RoutingTable::new());

	let session_ignis_addr = config
		.session_public_addr
		.map(|a| a.to_string())
		.unwrap_or_else(|| config.session_bind_addr.to_string());

	let deployer = Arc::new(Deployer::new(
		registry.clone(),
		connections.clone(),
		routing.clone(),
		DeployerConfig {
			language_images: parse_language_images(&config.language_images),
			ignis_addr: session_ignis_addr,
			rollback_on_failure: config.deploy_rollback_on_failure,
		},
	));

	let state = Arc::new(NodeState {
		registry: registry.clone(),
		peers: peers.clone(),
		connections: connections.clone(),
		routing: routing.clone(),
		deployer: deployer.clone(),
	});

	// One cancellation signal, cloned per background task.
	let (cancel_handle, cancel_token) = cancel_pair();

	let rpc_server = RpcServer::new(Arc::new(NodeDispatch {
		registry: registry.clone(),
		peers: peers.clone(),
	}));
	let rpc_bind_addr = config.rpc_bind_addr.to_string();
	let rpc_cancel = cancel_token.clone();
	let rpc_task = tokio::spawn(async move {
		if let Err(e) = rpc_server.serve(&rpc_bind_addr, rpc_cancel).await {
			warn!("peer rpc server stopped: {}", e);
		}
	});

	let session_server = SessionServer::new(connections.clone());
	let session_bind_addr = config.session_bind_addr.to_string();
	let session_cancel = cancel_token.clone();
	let session_task = tokio::spawn(async move {
		if let Err(e) = session_server.serve(&session_bind_addr, session_cancel).await {
			warn!("session server stopped: {}", e);
		}
	});

	let rest_server = RestServer::new(state.clone());
	let rest_bind_addr = config.rest_bind_addr;
	let rest_cancel = cancel_token.clone();
	let rest_task = tokio::spawn(async move {
		if let Err(e) = rest_server.serve(rest_bind_addr, rest_cancel).await {
			warn!("rest server stopped: {}", e);
		}
	});

	let monitor = Arc::new(ProviderMonitor::new(config.monitor_max_failures));
	let monitor_registry = registry.clone();
	let monitor_sink: Arc<dyn mesh_registry::monitor::HealthSink> = registry.clone();
	let monitor_interval = std::time::Duration::from_secs(config.monitor_interval_secs);
	let monitor_cancel = cancel_token.clone();
	let monitor_task = tokio::spawn(async move {
		monitor
			.run(
				monitor_interval,
				monitor_cancel,
				move || monitor_registry.list_providers().into_iter().map(|(_, p)| p).collect(),
				monitor_sink,
			)
			.await;
	});

	let gossip_peers = peers.clone();
	let gossip_discovery_sink: Arc<dyn mesh_rpc::peer_manager::DiscoverySink> = registry.clone();
	let gossip_registry = registry.clone();
	let gossip_interval = std::time::Duration::from_secs(config.gossip_interval_secs);
	let gossip_cancel = cancel_token.clone();
	let gossip_task = tokio::spawn(async move {
		mesh_util::background::run_periodic(gossip_interval, gossip_cancel, move || {
			let gossip_peers = gossip_peers.clone();
			let gossip_discovery_sink = gossip_discovery_sink.clone();
			let local = gossip_registry.clone();
			async move {
				let summaries = local.exchange_providers(Vec::new()).await;
				gossip_peers.gossip_round(summaries, &gossip_discovery_sink).await;
			}
		})
		.await;
	});

	info!(
		"node up: rpc={} session={} rest={}",
		config.rpc_bind_addr, config.session_bind_addr, config.rest_bind_addr
	);

	tokio::signal::ctrl_c().await.ok();
	info!("shutdown requested");
	cancel_handle.cancel();

	for task in [rpc_task, session_task, rest_task, monitor_task, gossip_task] {
		task.abort();
	}

	Ok(())
}
