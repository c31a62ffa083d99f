//! Peer RPC server : accepts one connection per request,
//! dispatching `ExchangePeers`, `ExchangeProviders`, and `CallProvider` to
//! whatever owns the registry and peer set. The server itself holds no
//! state beyond a dial address and a handle to the dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tracing::{info, warn};

use mesh_util::background::CancelToken;
use mesh_util::data::PeerEndpoint;

use crate::messages::{CallProviderArgs, PeerRequest, PeerResponse, ProviderSummary};
use crate::transport::serve_one;

/// What the RPC server forwards requests to. Implemented by the Provider
/// Registry together with the Peer Manager, kept as a trait here so this
/// crate never depends on the registry crate (it is the other way round).
#[async_trait]
pub trait Dispatch: Send + Sync {
	async fn exchange_peers(&self, known: Vec<PeerEndpoint>) -> Vec<PeerEndpoint>;
	async fn exchange_providers(&self, providers: Vec<ProviderSummary>) -> Vec<ProviderSummary>;

	/// Resolve `provider_id` against internal/locally-attached providers
	/// only and dispatch `call` on it. Peer-discovered providers are never
	/// forwarded here.
	async fn call_provider(&self, provider_id: &str, call: CallProviderArgs) -> Result<String, String>;
}

pub struct RpcServer {
	dispatch: Arc<dyn Dispatch>,
}

impl RpcServer {
	pub fn new(dispatch: Arc<dyn Dispatch>) -> Self {
		RpcServer { dispatch }
	}

	/// Bind `bind_addr` and accept connections until `cancel` fires. Each
	/// accepted connection is handled on its own task and serves exactly
	/// one request.
	pub async fn serve(&self, bind_addr: &str, mut cancel: CancelToken) -> std::io::Result<()> {
		let listener = TcpListener::bind(bind_addr).await?;
		info!("peer rpc server listening on {}", bind_addr);

		loop {
			tokio::select! {
				_ = cancel.cancelled() => {
					info!("peer rpc server on {} shutting down", bind_addr);
					return Ok(());
				}
				accepted = listener.accept() => {
					let (stream, peer) = match accepted {
						Ok(pair) => pair,
						Err(e) => {
							warn!("peer rpc accept failed: {}", e);
							continue;
						}
					};
					let dispatch = self.dispatch.clone();
					tokio::spawn(async move {
							if let Err(e) = serve_one(stream, |req| handle(dispatch, req)).await {
								warn!("peer rpc connection from {} failed: {}", peer, e);
							}
					});
				}
			}
		}
	}
}

async fn handle(dispatch: Arc<dyn Dispatch>, request: PeerRequest) -> PeerResponse {
	match request {
		PeerRequest::ExchangePeers { known } => {
			let peers = dispatch.exchange_peers(known).await;
			PeerResponse::ExchangePeers { peers }
		}
		PeerRequest::ExchangeProviders { providers } => {
			let providers = dispatch.exchange_providers(providers).await;
			PeerResponse::ExchangeProviders { providers }
		}
		PeerRequest::CallProvider { provider_id, call } => {
			let result = dispatch.call_provider(&provider_id, call).await;
			PeerResponse::CallProvider { result }
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Mutex;

	struct EchoDispatch {
		peers: Mutex<Vec<PeerEndpoint>>,
	}

	#[async_trait]
	impl Dispatch for EchoDispatch {
		async fn exchange_peers(&self, known: Vec<PeerEndpoint>) -> Vec<PeerEndpoint> {
			let mut peers = self.peers.lock().unwrap();
			for p in known {
				if !peers.contains(&p) {
					peers.push(p);
				}
			}
			peers.clone()
		}

		async fn exchange_providers(&self, _providers: Vec<ProviderSummary>) -> Vec<ProviderSummary> {
			Vec::new()
		}

		async fn call_provider(&self, provider_id: &str, _call: CallProviderArgs) -> Result<String, String> {
			Err(format!("unknown provider: {}", provider_id))
		}
	}

	#[tokio::test]
	async fn exchange_peers_round_trips_over_tcp() {
		let dispatch = Arc::new(EchoDispatch {
				peers: Mutex::new(vec![PeerEndpoint::from("127.0.0.1:9001")]),
		});
		let server = RpcServer::new(dispatch);
		let (cancel_handle, cancel_token) = mesh_util::background::cancel_pair();

		let bind_addr = "127.0.0.1:0".to_string();
		let listener = TcpListener::bind(&bind_addr).await.unwrap();
		let actual_addr = listener.local_addr().unwrap().to_string();
		drop(listener);

		let server_addr = actual_addr.clone();
		let handle = tokio::spawn(async move {
				server.serve(&server_addr, cancel_token).await.unwrap();
		});
		tokio::time::sleep(std::time::Duration::from_millis(50)).await;

		let response = crate::transport::call(
			&actual_addr,
			&PeerRequest::ExchangePeers {
				known: vec![PeerEndpoint::from("127.0.0.1:9002")],
			})
		.await
		.unwrap();

		match response {
			PeerResponse::ExchangePeers { peers } => {
				assert_eq!(peers.len(), 2);
			}
			_ => panic!("wrong response variant"),
		}

		cancel_handle.cancel();
		let _ = handle.await;
	}
}
