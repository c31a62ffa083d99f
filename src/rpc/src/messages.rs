//! Wire types for the peer RPC protocol.

use serde::{Deserialize, Serialize};

use mesh_util::data::{ContainerSpec, PeerEndpoint, ProviderStatus};

/// Directory entry describing a provider a node exposes to its peers
///.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSummary {
	pub id: String,
	pub name: String,
	pub type_tag: String,
	pub host: String,
	pub port: u16,
	pub status: ProviderStatus,
	/// Address of the peer that owns this provider. Empty when a node
	/// reports its own providers; filled in by the receiver when it
	/// constructs a Remote Provider proxy for a provider it learned about
	/// indirectly.
	#[serde(default)]
	pub peer_address: String,
}

/// Argument payload for `CallProvider`, keyed by method name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "args")]
pub enum CallProviderArgs {
	GetCapacity,
	GetAllocated,
	GetStatus,
	Deploy { spec: ContainerSpec },
	GetLogs { container_id: String, lines: u32 },
}

/// A request sent over one peer RPC connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PeerRequest {
	ExchangePeers { known: Vec<PeerEndpoint> },
	ExchangeProviders { providers: Vec<ProviderSummary> },
	CallProvider {
		provider_id: String,
		call: CallProviderArgs,
	},
}

/// The matching response, one variant per `PeerRequest` variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PeerResponse {
	ExchangePeers { peers: Vec<PeerEndpoint> },
	ExchangeProviders { providers: Vec<ProviderSummary> },
	CallProvider { result: Result<String, String> },
}
