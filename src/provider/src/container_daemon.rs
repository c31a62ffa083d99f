//! Container-daemon provider: wraps a local container engine via `bollard`.
//!
//! `get_capacity` queries the daemon's total CPU/memory. `get_allocated`
//! sums the resource limits of every running container, substituting the
//! documented defaults (1 CPU, 128 MiB) for containers that were launched
//! without explicit limits. `deploy` creates and starts a
//! container with the spec's requirements translated to engine-native
//! limits. `get_logs` reads the engine's multiplexed stdout/stderr stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use bollard::container::{
	Config, CreateContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
	StartContainerOptions,
};
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use tracing::{debug, warn};

use mesh_util::data::{Capacity, ContainerSpec, ProviderStatus, ResourceInfo};
use mesh_util::time::now_msec;

use crate::provider_trait::{Provider, ProviderError};

/// Default resource accounting applied to containers this provider did not
/// itself start with explicit limits (e.g. discovered, or started without a
/// requirements override).
pub const DEFAULT_CPU_MILLICORES: i64 = 1000;
pub const DEFAULT_MEMORY_BYTES: i64 = 128 * 1024 * 1024;

const MESH_LABEL: &str = "mesh.managed";
const MESH_PROVIDER_LABEL: &str = "mesh.provider_id";

pub struct ContainerDaemonProvider {
	id: String,
	name: String,
	docker: Docker,
	last_update: AtomicI64,
}

impl ContainerDaemonProvider {
	pub async fn connect(id: String, name: String, socket_path: Option<&str>) -> Result<Self, ProviderError> {
		let docker = match socket_path {
			Some(path) => Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION)
				.map_err(|e| ProviderError::BackendUnreachable(e.to_string()))?,
			None => Docker::connect_with_socket_defaults()
				.map_err(|e| ProviderError::BackendUnreachable(e.to_string()))?,
		};

		docker
			.ping()
			.await
			.map_err(|e| ProviderError::BackendUnreachable(e.to_string()))?;

		Ok(ContainerDaemonProvider {
			id,
			name,
			docker,
			last_update: AtomicI64::new(now_msec()),
		})
	}

	fn managed_labels(&self) -> HashMap<String, Vec<String>> {
		let mut filters = HashMap::new();
		filters.insert(MESH_LABEL.to_string(), vec!["true".to_string()]);
		filters.insert(MESH_PROVIDER_LABEL.to_string(), vec![self.id.clone()]);
		filters
	}
}

#[async_trait]
impl Provider for ContainerDaemonProvider {
	fn id(&self) -> &str {
		&self.id
	}

	fn name(&self) -> &str {
		&self.name
	}

	fn type_tag(&self) -> &str {
		"container-daemon"
	}

	async fn get_capacity(&self) -> Result<Capacity, ProviderError> {
		let info = self
			.docker
			.info()
			.await
			.map_err(|e| ProviderError::BackendUnreachable(e.to_string()))?;

		let total_cpu_millicores = info.ncpu.unwrap_or(0) as i64 * 1000;
		let total_memory_bytes = info.mem_total.unwrap_or(0);

		let used = self.get_allocated().await?;
		self.last_update.store(now_msec(), Ordering::Relaxed);

		Ok(Capacity::new(
			ResourceInfo::new(total_cpu_millicores, total_memory_bytes, 0),
			used,
		))
	}

	async fn get_allocated(&self) -> Result<ResourceInfo, ProviderError> {
		let options = ListContainersOptions::<String> {
			all: false,
			..Default::default()
		};
		let containers = self
			.docker
			.list_containers(Some(options))
			.await
			.map_err(|e| ProviderError::BackendUnreachable(e.to_string()))?;

		let mut total = ResourceInfo::ZERO;
		for summary in containers {
			let Some(container_id) = summary.id else {
				continue;
			};
			let inspect = self
				.docker
				.inspect_container(&container_id, None)
				.await
				.map_err(|e| ProviderError::BackendError(e.to_string()))?;

			let host_config = inspect.host_config.unwrap_or_default();
			let cpu_millicores = match host_config.nano_cpus {
				Some(n) if n > 0 => n / 1_000_000,
				_ => match host_config.cpu_quota {
					Some(q) if q > 0 => {
						let period = host_config.cpu_period.unwrap_or(100_000).max(1);
						(q * 1000) / period
					}
					_ => DEFAULT_CPU_MILLICORES,
				},
			};
			let memory_bytes = match host_config.memory {
				Some(m) if m > 0 => m,
				_ => DEFAULT_MEMORY_BYTES,
			};

			total += ResourceInfo::new(cpu_millicores, memory_bytes, 0);
		}

		Ok(total)
	}

	async fn get_status(&self) -> ProviderStatus {
		match self.docker.ping().await {
			Ok(_) => ProviderStatus::Connected,
			Err(e) => {
				warn!("container-daemon provider {} ping failed: {}", self.id, e);
				ProviderStatus::Disconnected
			}
		}
	}

	async fn last_update_time(&self) -> i64 {
		self.last_update.load(Ordering::Relaxed)
	}

	async fn deploy(&self, spec: &ContainerSpec) -> Result<String, ProviderError> {
		let env: Vec<String> = spec
			.env
			.iter()
			.map(|(k, v)| format!("{}={}", k, v))
			.collect();

		let host_config = HostConfig {
			nano_cpus: Some(spec.requirements.cpu_millicores * 1_000_000),
			memory: Some(spec.requirements.memory_bytes),
			..Default::default()
		};

		let mut labels = HashMap::new();
		labels.insert(MESH_LABEL.to_string(), "true".to_string());
		labels.insert(MESH_PROVIDER_LABEL.to_string(), self.id.clone());

		let config = Config {
			image: Some(spec.image.clone()),
			cmd: if spec.command.is_empty() {
				None
			} else {
				Some(spec.command.clone())
			},
			env: Some(env),
			host_config: Some(host_config),
			labels: Some(labels),
			..Default::default()
		};

		let name = format!("mesh-{}", uuid_like_suffix());
		let options = CreateContainerOptions {
			name: name.clone(),
			platform: None,
		};

		let response = self
			.docker
			.create_container(Some(options), config)
			.await
			.map_err(|e| ProviderError::BackendError(e.to_string()))?;

		self.docker
			.start_container(&response.id, None::<StartContainerOptions<String>>)
			.await
			.map_err(|e| ProviderError::BackendError(e.to_string()))?;

		debug!("deployed container {} on provider {}", response.id, self.id);
		Ok(response.id)
	}

	async fn get_logs(&self, container_id: &str, lines: u32) -> Result<Vec<String>, ProviderError> {
		let options = LogsOptions::<String> {
			stdout: true,
			stderr: true,
			tail: lines.to_string(),
			timestamps: false,
			follow: false,
			..Default::default()
		};

		let mut stream = self.docker.logs(container_id, Some(options));
		let mut out = Vec::new();
		while let Some(chunk) = stream.next().await {
			match chunk {
				Ok(LogOutput::StdOut { message } | LogOutput::StdErr { message }) => {
					out.push(String::from_utf8_lossy(&message).trim_end().to_string());
				}
				Ok(_) => {}
				Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
					return Err(ProviderError::UnknownContainer(container_id.to_string()));
				}
				Err(e) => return Err(ProviderError::BackendError(e.to_string())),
			}
		}

		if out.len() as u32 > lines {
			let skip = out.len() - lines as usize;
			out.drain(0..skip);
		}
		Ok(out)
	}
}

fn uuid_like_suffix() -> String {
	use rand::Rng;
	let mut rng = rand::thread_rng();
	(0..10)
		.map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
		.collect::<String>()
		.to_lowercase()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	#[ignore] // requires a reachable Docker daemon
	async fn connects_and_reports_capacity() {
		let provider = ContainerDaemonProvider::connect("docker-1".into(), "local docker".into(), None)
			.await
			.unwrap();
		let capacity = provider.get_capacity().await.unwrap();
		assert_eq!(capacity.total, capacity.used + capacity.available);
	}
}
