//! Peer set and gossip round. The peer set is a monotonic
//! mathematical set guarded by a mutex: `add_many` only ever grows it, and
//! there is no removal via gossip — only `remove`, called by an
//! administrator action elsewhere in the node.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use mesh_util::data::PeerEndpoint;

use crate::messages::{PeerRequest, PeerResponse, ProviderSummary};
use crate::transport::call;

/// Where gossip-discovered providers end up. Implemented by the Provider
/// Registry so this crate stays independent of it.
#[async_trait]
pub trait DiscoverySink: Send + Sync {
	async fn knows_provider(&self, id: &str) -> bool;
	async fn register_discovered(&self, summary: ProviderSummary, peer_address: String);
}

pub struct PeerManager {
	peers: std::sync::Mutex<HashSet<PeerEndpoint>>,
}

impl PeerManager {
	pub fn new() -> Self {
		PeerManager {
			peers: std::sync::Mutex::new(HashSet::new()),
		}
	}

	pub fn get(&self) -> Vec<PeerEndpoint> {
		self.peers.lock().unwrap().iter().cloned().collect()
	}

	/// Union `list` into the local set. Idempotent; returns nothing because
	/// the set has no meaningful "was this new" signal worth surfacing.
	pub fn add_many(&self, list: impl IntoIterator<Item = PeerEndpoint>) {
		let mut peers = self.peers.lock().unwrap();
		for p in list {
			peers.insert(p);
		}
	}

	/// Administrator-triggered removal; never invoked by the gossip loop
	/// itself.
	pub fn remove(&self, endpoint: &PeerEndpoint) {
		self.peers.lock().unwrap().remove(endpoint);
	}

	/// Run one gossip round against every currently known peer. Failures against a single peer are logged and do not abort
	/// the round.
	pub async fn gossip_round(&self, local_providers: Vec<ProviderSummary>, sink: &Arc<dyn DiscoverySink>) {
		let snapshot = self.get();
		for endpoint in snapshot {
			if let Err(e) = self.gossip_with(&endpoint, local_providers.clone(), sink).await {
				warn!("gossip round with {} failed: {}", endpoint, e);
			}
		}
	}

	async fn gossip_with(
		&self,
		endpoint: &PeerEndpoint,
		local_providers: Vec<ProviderSummary>,
		sink: &Arc<dyn DiscoverySink>,
	) -> Result<(), String> {
		let known = self.get();
		let peers_response = call(&endpoint.0, &PeerRequest::ExchangePeers { known })
			.await
			.map_err(|e| e.to_string())?;
		if let PeerResponse::ExchangePeers { peers } = peers_response {
			self.add_many(peers);
		}

		let providers_response = call(
			&endpoint.0,
			&PeerRequest::ExchangeProviders {
				providers: local_providers,
			},
		)
		.await
		.map_err(|e| e.to_string())?;

		if let PeerResponse::ExchangeProviders { providers } = providers_response {
			for mut summary in providers {
				if sink.knows_provider(&summary.id).await {
					continue;
				}
				summary.peer_address = endpoint.0.clone();
				debug!("discovered provider {} via peer {}", summary.id, endpoint);
				sink.register_discovered(summary, endpoint.0.clone()).await;
			}
		}

		Ok(())
	}
}

impl Default for PeerManager {
	fn default() -> Self {
		PeerManager::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn add_many_is_idempotent() {
		let pm = PeerManager::new();
		pm.add_many(vec![PeerEndpoint::from("a:1"), PeerEndpoint::from("b:2")]);
		pm.add_many(vec![PeerEndpoint::from("a:1")]);
		assert_eq!(pm.get().len(), 2);
	}

	#[test]
	fn remove_is_administrator_only() {
		let pm = PeerManager::new();
		pm.add_many(vec![PeerEndpoint::from("a:1")]);
		pm.remove(&PeerEndpoint::from("a:1"));
		assert!(pm.get().is_empty());
	}
}
