//! The per-replica Stub actor : a lightweight local
//! handle that forwards any message addressed to it onto its replica's
//! session send queue. This is deliberately not a full actor-framework
//! object — neither this project's teacher nor the rest of the example
//! pack pulls in an actor crate for this kind of local routing, so a plain
//! struct over the existing session queue is the idiomatic fit.

use std::sync::Arc;

use mesh_session::{Frame, Session};

#[derive(Clone)]
pub struct Stub {
	pid: String,
	session: Arc<Session>,
}

impl Stub {
	pub fn new(pid: String, session: Arc<Session>) -> Self {
		Stub { pid, session }
	}

	pub fn pid(&self) -> &str {
		&self.pid
	}

	/// Forward `msg` onto the session's send queue.
	pub fn receive(&self, msg: Frame) {
		self.session.enqueue_send(msg);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use mesh_util::data::ConnectionId;

	#[tokio::test]
	async fn receive_forwards_onto_the_session() {
		let conn_id = ConnectionId::new("app1", "f", 0);
		let session = Session::spawn(conn_id, 8);
		let stub = Stub::new("stub-1".into(), session.clone());

		stub.receive(Frame::Ack {
				correlation_id: "x".into(),
		});

		let (sink, mut rx) = tokio::sync::mpsc::unbounded_channel();
		session.bind(sink);
		let received = rx.recv().await.unwrap();
		assert!(matches!(received, Frame::Ack { correlation_id } if correlation_id == "x"));
	}
}
