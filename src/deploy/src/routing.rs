//! Per-app routing table : maps connection-ids and
//! well-known aliases (`store-<conn_id>`) to the Stub that should receive
//! messages addressed to them, and resolves reply-to hints discovered on
//! inbound frames.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::stub::Stub;

pub struct RoutingTable {
	routes: RwLock<HashMap<String, Stub>>,
}

impl RoutingTable {
	pub fn new() -> Self {
		RoutingTable {
			routes: RwLock::new(HashMap::new()),
		}
	}

	pub fn register(&self, target: String, stub: Stub) {
		self.routes.write().unwrap().insert(target, stub);
	}

	pub fn resolve(&self, target: &str) -> Option<Stub> {
		self.routes.read().unwrap().get(target).cloned()
	}

	pub fn remove(&self, target: &str) {
		self.routes.write().unwrap().remove(target);
	}
}

impl Default for RoutingTable {
	fn default() -> Self {
		RoutingTable::new()
	}
}

/// The well-known alias a replica's store-facing stub is additionally
/// registered under.
pub fn store_alias(conn_id: &str) -> String {
	format!("store-{}", conn_id)
}

#[cfg(test)]
mod tests {
	use super::*;
	use mesh_session::Session;
	use mesh_util::data::ConnectionId;

	#[tokio::test]
	async fn register_and_resolve_round_trip() {
		let table = RoutingTable::new();
		let session = Session::spawn(ConnectionId::new("app1", "f", 0), 4);
		let stub = Stub::new("stub-1".into(), session);
		table.register("app1:f-0".into(), stub.clone());

		assert!(table.resolve("app1:f-0").is_some());
		assert!(table.resolve("missing").is_none());

		table.remove("app1:f-0");
		assert!(table.resolve("app1:f-0").is_none());
	}

	#[test]
	fn store_alias_has_well_known_prefix() {
		assert_eq!(store_alias("app1:f-0"), "store-app1:f-0");
	}
}
