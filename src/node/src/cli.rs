//! Administrative subcommands. These talk to a running node's REST façade
//! instead of a binary RPC protocol, since that façade is this project's
//! only externally reachable admin surface.

use format_table::format_table;
use hyper::{Body, Client, Method, Request, StatusCode};
use structopt::StructOpt;

use mesh_util::config::InternalProviderConfig;
use mesh_util::error::{Error, ErrorContext, OkOrMessage};

#[derive(StructOpt, Debug)]
pub enum ProviderOperation {
	/// List every provider this node currently knows about.
	List,
	/// Register a new locally-attached provider.
	Register {
		#[structopt(long)]
		type_tag: String,
		#[structopt(long)]
		name: String,
		/// Only used when type-tag is "mock".
		#[structopt(long, default_value = "1000")]
		mock_cpu_millicores: i64,
		#[structopt(long, default_value = "1073741824")]
		mock_memory_bytes: i64,
		/// Only used when type-tag is "container-daemon".
		#[structopt(long)]
		socket_path: Option<String>,
		/// Only used when type-tag is "cluster-orchestrator".
		#[structopt(long)]
		namespace: Option<String>,
		#[structopt(long)]
		label_selector: Option<String>,
	},
	/// Remove a locally-attached provider.
	Unregister { id: String },
}

#[derive(StructOpt, Debug)]
pub enum PeerOperation {
	/// List every peer this node currently knows about.
	List,
	/// Add a peer by its `host:port` RPC address.
	Add { addr: String },
}

#[derive(StructOpt, Debug)]
pub enum Command {
	/// Run the node: RPC listener, session listener, REST façade, gossip
	/// and monitor loops.
	Server,
	/// Print a ClusterHealth-equivalent snapshot.
	Status,
	Provider(ProviderOperation),
	Peer(PeerOperation),
}

pub struct AdminClient {
	base_url: String,
	client: Client<hyper::client::HttpConnector>,
}

impl AdminClient {
	pub fn new(rest_addr: &str) -> Self {
		AdminClient {
			base_url: format!("http://{}", rest_addr),
			client: Client::new(),
		}
	}

	async fn get(&self, path: &str) -> Result<String, Error> {
		let uri = format!("{}{}", self.base_url, path)
			.parse()
			.map_err(|e| Error::Message(format!("invalid admin URL: {}", e)))?;
		let resp = self
			.client
			.get(uri)
			.await
			.map_err(|e| Error::Message(format!("admin request failed: {}", e)))?;
		read_body(resp).await
	}

	async fn send(&self, method: Method, path: &str, body: &serde_json::Value) -> Result<String, Error> {
		let uri = format!("{}{}", self.base_url, path);
		let req = Request::builder()
			.method(method)
			.uri(uri)
			.header("content-type", "application/json")
			.body(Body::from(serde_json::to_vec(body).unwrap()))
			.map_err(|e| Error::Message(format!("building admin request: {}", e)))?;
		let resp = self
			.client
			.request(req)
			.await
			.map_err(|e| Error::Message(format!("admin request failed: {}", e)))?;
		read_body(resp).await
	}

	async fn delete(&self, path: &str) -> Result<(), Error> {
		let uri = format!("{}{}", self.base_url, path);
		let req = Request::builder()
			.method(Method::DELETE)
			.uri(uri)
			.body(Body::empty())
			.map_err(|e| Error::Message(format!("building admin request: {}", e)))?;
		self.client
			.request(req)
			.await
			.map_err(|e| Error::Message(format!("admin request failed: {}", e)))?;
		Ok(())
	}
}

async fn read_body(resp: hyper::Response<Body>) -> Result<String, Error> {
	let status = resp.status();
	let bytes = hyper::body::to_bytes(resp.into_body())
		.await
		.map_err(|e| Error::Message(format!("reading admin response body: {}", e)))?;
	let text = String::from_utf8_lossy(&bytes).to_string();
	if status.is_success() || status == StatusCode::NO_CONTENT {
		Ok(text)
	} else {
		Err(Error::Message(format!("admin request failed ({}): {}", status, text)))
	}
}

pub async fn dispatch(cmd: Command, rest_addr: &str) -> Result<(), Error> {
	let client = AdminClient::new(rest_addr);
	match cmd {
		Command::Server => unreachable!("Command::Server is handled before dispatch"),
		Command::Status => cmd_status(&client).await,
		Command::Provider(ProviderOperation::List) => cmd_provider_list(&client).await,
		Command::Provider(ProviderOperation::Register {
			type_tag,
			name,
			mock_cpu_millicores,
			mock_memory_bytes,
			socket_path,
			namespace,
			label_selector,
		}) => {
			let config = match type_tag.as_str() {
				"mock" => InternalProviderConfig::Mock {
					total: mesh_util::data::ResourceInfo::new(mock_cpu_millicores, mock_memory_bytes, 0),
				},
				"container-daemon" => InternalProviderConfig::ContainerDaemon { socket_path },
				"cluster-orchestrator" => InternalProviderConfig::ClusterOrchestrator {
					namespace: namespace.ok_or_message("--namespace is required for cluster-orchestrator")?,
					label_selector: label_selector.ok_or_message("--label-selector is required for cluster-orchestrator")?,
				},
				other => return Err(Error::Message(format!("unknown provider type-tag: {}", other))),
			};
			let body = serde_json::json!({ "type_tag": type_tag, "name": name, "config": config });
			let resp = client.send(Method::POST, "/v1/providers", &body).await?;
			println!("{}", resp);
			Ok(())
		}
		Command::Provider(ProviderOperation::Unregister { id }) => {
			client.delete(&format!("/v1/providers/{}", id)).await?;
			println!("unregistered {}", id);
			Ok(())
		}
		Command::Peer(PeerOperation::List) => cmd_peer_list(&client).await,
		Command::Peer(PeerOperation::Add { addr }) => {
			let body = serde_json::json!({ "addr": addr });
			client.send(Method::POST, "/v1/peers", &body).await?;
			println!("added peer {}", addr);
			Ok(())
		}
	}
}

async fn cmd_status(client: &AdminClient) -> Result<(), Error> {
	let body = client.get("/v1/health").await?;
	println!("{}", body);
	Ok(())
}

async fn cmd_provider_list(client: &AdminClient) -> Result<(), Error> {
	let body = client.get("/v1/providers").await?;
	let entries: Vec<serde_json::Value> = serde_json::from_str(&body).err_context("parsing provider list")?;

	let mut rows = vec!["ID\tName\tType\tKind".to_string()];
	for entry in entries {
		rows.push(format!(
			"{}\t{}\t{}\t{}",
			entry["id"].as_str().unwrap_or("?"),
			entry["name"].as_str().unwrap_or("?"),
			entry["type_tag"].as_str().unwrap_or("?"),
			entry["kind"].as_str().unwrap_or("?")
		));
	}
	format_table(rows);
	Ok(())
}

async fn cmd_peer_list(client: &AdminClient) -> Result<(), Error> {
	let body = client.get("/v1/peers").await?;
	let entries: Vec<String> = serde_json::from_str(&body).err_context("parsing peer list")?;
	let mut rows = vec!["Address".to_string()];
	rows.extend(entries);
	format_table(rows);
	Ok(())
}
