//! Cluster-orchestrator provider: creates a Pod-equivalent in a configured
//! namespace via `kube`, with requests=limits, and a GPU resource class
//! when `requirements.gpu_count > 0`. Capacity is the allocatable sum of
//! nodes matching a label selector.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
	Container, Node, Pod, PodSpec, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, ListParams, ObjectMeta, PostParams};
use kube::Client;
use tracing::warn;

use mesh_util::data::{Capacity, ContainerSpec, ProviderStatus, ResourceInfo};
use mesh_util::time::now_msec;

use crate::provider_trait::{Provider, ProviderError};

const GPU_RESOURCE_NAME: &str = "nvidia.com/gpu";

pub struct ClusterOrchestratorProvider {
	id: String,
	name: String,
	client: Client,
	namespace: String,
	node_label_selector: String,
	last_update: AtomicI64,
}

impl ClusterOrchestratorProvider {
	pub async fn connect(
		id: String,
		name: String,
		namespace: String,
		node_label_selector: String,
	) -> Result<Self, ProviderError> {
		let client = Client::try_default()
			.await
			.map_err(|e| ProviderError::BackendUnreachable(e.to_string()))?;

		Ok(ClusterOrchestratorProvider {
			id,
			name,
			client,
			namespace,
			node_label_selector,
			last_update: AtomicI64::new(now_msec()),
		})
	}

	fn resource_requirements(req: &ResourceInfo) -> ResourceRequirements {
		let mut quantities = BTreeMap::new();
		quantities.insert("cpu".to_string(), Quantity(format!("{}m", req.cpu_millicores)));
		quantities.insert("memory".to_string(), Quantity(format!("{}", req.memory_bytes)));
		if req.gpu_count > 0 {
			quantities.insert(GPU_RESOURCE_NAME.to_string(), Quantity(format!("{}", req.gpu_count)));
		}

		ResourceRequirements {
			requests: Some(quantities.clone()),
			limits: Some(quantities),
			..Default::default()
		}
	}
}

#[async_trait]
impl Provider for ClusterOrchestratorProvider {
	fn id(&self) -> &str {
		&self.id
	}

	fn name(&self) -> &str {
		&self.name
	}

	fn type_tag(&self) -> &str {
		"cluster-orchestrator"
	}

	async fn get_capacity(&self) -> Result<Capacity, ProviderError> {
		let nodes: Api<Node> = Api::all(self.client.clone());
		let list = nodes
			.list(&ListParams::default().labels(&self.node_label_selector))
			.await
			.map_err(|e| ProviderError::BackendUnreachable(e.to_string()))?;

		let mut total = ResourceInfo::ZERO;
		for node in list.items {
			if let Some(status) = node.status {
				if let Some(allocatable) = status.allocatable {
					let cpu = allocatable
						.get("cpu")
						.and_then(|q| parse_cpu_millicores(&q.0))
						.unwrap_or(0);
					let memory = allocatable
						.get("memory")
						.and_then(|q| parse_bytes(&q.0))
						.unwrap_or(0);
					let gpu = allocatable
						.get(GPU_RESOURCE_NAME)
						.and_then(|q| q.0.parse::<i64>().ok())
						.unwrap_or(0);
					total += ResourceInfo::new(cpu, memory, gpu);
				}
			}
		}

		let used = self.get_allocated().await?;
		self.last_update.store(now_msec(), Ordering::Relaxed);
		Ok(Capacity::new(total, used))
	}

	async fn get_allocated(&self) -> Result<ResourceInfo, ProviderError> {
		let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
		let list = pods
			.list(&ListParams::default())
			.await
			.map_err(|e| ProviderError::BackendUnreachable(e.to_string()))?;

		let mut total = ResourceInfo::ZERO;
		for pod in list.items {
			let Some(spec) = pod.spec else { continue };
			for container in spec.containers {
				if let Some(resources) = container.resources {
					if let Some(requests) = resources.requests {
						let cpu = requests
							.get("cpu")
							.and_then(|q| parse_cpu_millicores(&q.0))
							.unwrap_or(0);
						let memory = requests
							.get("memory")
							.and_then(|q| parse_bytes(&q.0))
							.unwrap_or(0);
						let gpu = requests
							.get(GPU_RESOURCE_NAME)
							.and_then(|q| q.0.parse::<i64>().ok())
							.unwrap_or(0);
						total += ResourceInfo::new(cpu, memory, gpu);
					}
				}
			}
		}
		Ok(total)
	}

	async fn get_status(&self) -> ProviderStatus {
		let nodes: Api<Node> = Api::all(self.client.clone());
		match nodes.list(&ListParams::default().limit(1)).await {
			Ok(_) => ProviderStatus::Connected,
			Err(e) => {
				warn!("cluster-orchestrator provider {} unreachable: {}", self.id, e);
				ProviderStatus::Disconnected
			}
		}
	}

	async fn last_update_time(&self) -> i64 {
		self.last_update.load(Ordering::Relaxed)
	}

	async fn deploy(&self, spec: &ContainerSpec) -> Result<String, ProviderError> {
		let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);

		let name = format!("mesh-{}", rand_suffix());
		let env = spec
			.env
			.iter()
			.map(|(k, v)| k8s_openapi::api::core::v1::EnvVar {
				name: k.clone(),
				value: Some(v.clone()),
				..Default::default()
			})
			.collect();

		let pod = Pod {
			metadata: ObjectMeta {
				name: Some(name.clone()),
				namespace: Some(self.namespace.clone()),
				..Default::default()
			},
			spec: Some(PodSpec {
				containers: vec![Container {
					name: "workload".to_string(),
					image: Some(spec.image.clone()),
					command: if spec.command.is_empty() {
						None
					} else {
						Some(spec.command.clone())
					},
					env: Some(env),
					resources: Some(Self::resource_requirements(&spec.requirements)),
					..Default::default()
				}],
				restart_policy: Some("Never".to_string()),
				..Default::default()
			}),
			..Default::default()
		};

		let created = pods
			.create(&PostParams::default(), &pod)
			.await
			.map_err(|e| ProviderError::BackendError(e.to_string()))?;

		Ok(created.metadata.name.unwrap_or(name))
	}

	async fn get_logs(&self, container_id: &str, lines: u32) -> Result<Vec<String>, ProviderError> {
		let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
		let params = kube::api::LogParams {
			tail_lines: Some(lines as i64),
			..Default::default()
		};
		let logs = pods
			.logs(container_id, &params)
			.await
			.map_err(|e| match e {
				kube::Error::Api(ae) if ae.code == 404 => {
					ProviderError::UnknownContainer(container_id.to_string())
				}
				other => ProviderError::BackendError(other.to_string()),
			})?;

		Ok(logs.lines().map(|l| l.to_string()).collect())
	}
}

fn parse_cpu_millicores(s: &str) -> Option<i64> {
	if let Some(stripped) = s.strip_suffix('m') {
		stripped.parse::<i64>().ok()
	} else {
		s.parse::<f64>().ok().map(|v| (v * 1000.0) as i64)
	}
}

fn parse_bytes(s: &str) -> Option<i64> {
	const UNITS: &[(&str, i64)] = &[
		("Ki", 1024),
		("Mi", 1024 * 1024),
		("Gi", 1024 * 1024 * 1024),
		("Ti", 1024 * 1024 * 1024 * 1024),
	];
	for (suffix, factor) in UNITS {
		if let Some(stripped) = s.strip_suffix(suffix) {
			return stripped.parse::<i64>().ok().map(|v| v * factor);
		}
	}
	s.parse::<i64>().ok()
}

fn rand_suffix() -> String {
	use rand::Rng;
	let mut rng = rand::thread_rng();
	(0..8)
		.map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
		.collect::<String>()
		.to_lowercase()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_memory_quantities() {
		assert_eq!(parse_bytes("128Mi"), Some(128 * 1024 * 1024));
		assert_eq!(parse_bytes("1Gi"), Some(1024 * 1024 * 1024));
		assert_eq!(parse_bytes("512"), Some(512));
	}

	#[test]
	fn parses_cpu_quantities() {
		assert_eq!(parse_cpu_millicores("500m"), Some(500));
		assert_eq!(parse_cpu_millicores("2"), Some(2000));
	}
}
