//! Minimal REST façade (SPEC_FULL.md ambient stack item 4): submit a
//! Function, read aggregate capacity, list providers, plus the peer/health
//! admin endpoints the CLI talks to. Intentionally thin — no auth, no
//! content negotiation beyond JSON — none of the deployment or placement
//! logic lives here.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use mesh_provider::Provider;
use mesh_util::background::CancelToken;
use mesh_util::config::InternalProviderConfig;
use mesh_util::data::{Function, PeerEndpoint, ProviderKind, StoreRef};
use mesh_util::error::ControlError;

use crate::state::NodeState;

pub struct RestServer {
	state: Arc<NodeState>,
}

impl RestServer {
	pub fn new(state: Arc<NodeState>) -> Self {
		RestServer { state }
	}

	pub async fn serve(&self, bind_addr: SocketAddr, mut cancel: CancelToken) -> std::io::Result<()> {
		let state = self.state.clone();
		let make_svc = make_service_fn(move |_conn| {
				let state = state.clone();
				async move {
					Ok::<_, Infallible>(service_fn(move |req| {
								let state = state.clone();
								async move { Ok::<_, Infallible>(handle(state, req).await) }
					}))
				}
		});

		let server = Server::bind(&bind_addr).serve(make_svc);
		info!("rest façade listening on {}", bind_addr);

		let graceful = server.with_graceful_shutdown(async move {
				cancel.cancelled().await;
		});

		if let Err(e) = graceful.await {
			warn!("rest façade error: {}", e);
		}
		Ok(())
	}
}

#[derive(Debug, Deserialize)]
struct DeployRequest {
	app_id: String,
	function: Function,
	store_ref: StoreRef,
}

#[derive(Debug, Deserialize)]
struct RegisterProviderRequest {
	type_tag: String,
	name: String,
	config: InternalProviderConfig,
}

#[derive(Debug, Deserialize)]
struct AddPeerRequest {
	addr: String,
}

#[derive(Debug, Serialize)]
struct ProviderListEntry {
	kind: &'static str,
	id: String,
	name: String,
	type_tag: String,
}

async fn handle(state: Arc<NodeState>, req: Request<Body>) -> Response<Body> {
	let path = req.uri().path().to_string();
	let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

	match (req.method().clone(), segments.as_slice()) {
		(Method::POST, ["v1", "functions"]) => deploy_function(state, req).await,
		(Method::GET, ["v1", "capacity"]) => json_response(StatusCode::OK, &state.registry.get_capacity().await),
		(Method::GET, ["v1", "health"]) => json_response(StatusCode::OK, &state.registry.cluster_health().await),
		(Method::GET, ["v1", "providers"]) => list_providers(state).await,
		(Method::POST, ["v1", "providers"]) => register_provider(state, req).await,
		(Method::DELETE, ["v1", "providers", id]) => {
			state.registry.unregister_provider(id).await;
			empty_response(StatusCode::NO_CONTENT)
		}
		(Method::GET, ["v1", "peers"]) => json_response(StatusCode::OK, &state.peers.get()),
		(Method::POST, ["v1", "peers"]) => add_peer(state, req).await,
		_ => empty_response(StatusCode::NOT_FOUND),
	}
}

async fn deploy_function(state: Arc<NodeState>, req: Request<Body>) -> Response<Body> {
	let body = match read_body(req).await {
		Ok(b) => b,
		Err(resp) => return resp,
	};
	let request: DeployRequest = match serde_json::from_slice(&body) {
		Ok(r) => r,
		Err(e) => return error_response(StatusCode::BAD_REQUEST, &ControlError::InvalidRequest(e.to_string())),
	};

	match state
	.deployer
	.deploy(&request.app_id, &request.function, request.store_ref)
	.await
	{
		Ok(actors) => json_response(StatusCode::OK, &actors),
		Err(e) => error_response(StatusCode::CONFLICT, &e.cause),
	}
}

async fn list_providers(state: Arc<NodeState>) -> Response<Body> {
	let entries: Vec<ProviderListEntry> = state
	.registry
	.list_providers()
	.into_iter()
	.map(|(kind, p)| ProviderListEntry {
			kind: match kind {
				ProviderKind::Internal => "internal",
				ProviderKind::LocallyAttached => "locally_attached",
				ProviderKind::PeerDiscovered => "peer_discovered",
			},
			id: p.id().to_string(),
			name: p.name().to_string(),
			type_tag: p.type_tag().to_string(),
	})
	.collect();
	json_response(StatusCode::OK, &entries)
}

async fn register_provider(state: Arc<NodeState>, req: Request<Body>) -> Response<Body> {
	let body = match read_body(req).await {
		Ok(b) => b,
		Err(resp) => return resp,
	};
	let request: RegisterProviderRequest = match serde_json::from_slice(&body) {
		Ok(r) => r,
		Err(e) => return error_response(StatusCode::BAD_REQUEST, &ControlError::InvalidRequest(e.to_string())),
	};

	match state
	.registry
	.register_provider(&request.type_tag, &request.name, request.config)
	.await
	{
		Ok(id) => json_response(StatusCode::OK, &serde_json::json!({ "id": id })),
		Err(e) => error_response(StatusCode::BAD_REQUEST, &e),
	}
}

async fn add_peer(state: Arc<NodeState>, req: Request<Body>) -> Response<Body> {
	let body = match read_body(req).await {
		Ok(b) => b,
		Err(resp) => return resp,
	};
	let request: AddPeerRequest = match serde_json::from_slice(&body) {
		Ok(r) => r,
		Err(e) => return error_response(StatusCode::BAD_REQUEST, &ControlError::InvalidRequest(e.to_string())),
	};
	state.peers.add_many(vec![PeerEndpoint::from(request.addr)]);
	empty_response(StatusCode::NO_CONTENT)
}

async fn read_body(req: Request<Body>) -> Result<bytes::Bytes, Response<Body>> {
	hyper::body::to_bytes(req.into_body())
	.await
	.map_err(|e| error_response(StatusCode::BAD_REQUEST, &ControlError::InvalidRequest(e.to_string())))
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
	let body = serde_json::to_vec(value).expect("response value always serializes");
	Response::builder()
	.status(status)
	.header("content-type", "application/json")
	.body(Body::from(body))
	.expect("response builder never fails with a fixed set of headers")
}

fn error_response(status: StatusCode, err: &ControlError) -> Response<Body> {
	json_response(status, &serde_json::json!({ "error": err.to_string() }))
}

fn empty_response(status: StatusCode) -> Response<Body> {
	Response::builder().status(status).body(Body::empty()).unwrap()
}
