//! Connection Manager : a map from connection-id to Session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use mesh_util::data::ConnectionId;

use crate::session::Session;

pub struct ConnectionManager {
	connections: Mutex<HashMap<ConnectionId, Arc<Session>>>,
	queue_capacity: usize,
}

impl ConnectionManager {
	pub fn new(queue_capacity: usize) -> Self {
		ConnectionManager {
			connections: Mutex::new(HashMap::new()),
			queue_capacity,
		}
	}

	/// Idempotent: a second call with the same `conn_id` returns the same
	/// session object.
	pub fn new_session(&self, conn_id: ConnectionId) -> Arc<Session> {
		let mut connections = self.connections.lock().unwrap();
		connections
			.entry(conn_id.clone())
			.or_insert_with(|| Session::spawn(conn_id, self.queue_capacity))
			.clone()
	}

	pub fn get(&self, conn_id: &ConnectionId) -> Option<Arc<Session>> {
		self.connections.lock().unwrap().get(conn_id).cloned()
	}

	/// Close and forget a session. A later `new_session` with the same id
	/// starts a fresh session.
	pub fn close(&self, conn_id: &ConnectionId) {
		if let Some(session) = self.connections.lock().unwrap().remove(conn_id) {
			debug!("closing session {}", conn_id);
			session.close();
		}
	}
}

impl Default for ConnectionManager {
	fn default() -> Self {
		ConnectionManager::new(64)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn new_session_is_idempotent() {
		let manager = ConnectionManager::new(8);
		let conn_id = ConnectionId::new("app1", "f", 0);
		let a = manager.new_session(conn_id.clone());
		let b = manager.new_session(conn_id);
		assert!(Arc::ptr_eq(&a, &b));
	}

	#[test]
	fn close_removes_the_session() {
		let manager = ConnectionManager::new(8);
		let conn_id = ConnectionId::new("app1", "f", 0);
		manager.new_session(conn_id.clone());
		manager.close(&conn_id);
		assert!(manager.get(&conn_id).is_none());
	}
}
