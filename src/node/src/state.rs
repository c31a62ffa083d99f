//! Glue between the independent crates: the peer set lives in
//! `PeerManager`, providers live in `ProviderRegistry`, sessions live in
//! `ConnectionManager`/`RoutingTable`, and `NodeDispatch` is the one place
//! that sees all of them at once to answer peer RPCs.

use std::sync::Arc;

use async_trait::async_trait;

use mesh_deploy::{Deployer, RoutingTable};
use mesh_registry::ProviderRegistry;
use mesh_rpc::server::Dispatch;
use mesh_rpc::{CallProviderArgs, PeerManager, ProviderSummary};
use mesh_session::ConnectionManager;
use mesh_util::data::PeerEndpoint;

pub struct NodeState {
	pub registry: Arc<ProviderRegistry>,
	pub peers: Arc<PeerManager>,
	pub connections: Arc<ConnectionManager>,
	pub routing: Arc<RoutingTable>,
	pub deployer: Arc<Deployer>,
}

pub struct NodeDispatch {
	pub registry: Arc<ProviderRegistry>,
	pub peers: Arc<PeerManager>,
}

#[async_trait]
impl Dispatch for NodeDispatch {
	async fn exchange_peers(&self, known: Vec<PeerEndpoint>) -> Vec<PeerEndpoint> {
		self.peers.add_many(known);
		self.peers.get()
	}

	async fn exchange_providers(&self, providers: Vec<ProviderSummary>) -> Vec<ProviderSummary> {
		self.registry.exchange_providers(providers).await
	}

	async fn call_provider(&self, provider_id: &str, call: CallProviderArgs) -> Result<String, String> {
		self.registry.call_provider(provider_id, call).await
	}
}
