//! A single bidirectional session between the control plane and one
//! runtime container.
//!
//! Lifecycle: Created -> Bound -> Closed, one-shot. The
//! sender-callback is the channel end the session's driver task hands off
//! to whichever transport connection binds it; until that happens, enqueued
//! frames sit in the bounded send queue. Enqueue beyond the queue's
//! capacity drops the frame rather than blocking the caller.

use std::sync::Mutex;

use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, warn};

use mesh_util::data::ConnectionId;

use crate::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	Created,
	Bound,
	Closed,
}

/// The channel a bound transport connection drains to write frames to the
/// wire, in enqueue order.
pub type FrameSink = mpsc::UnboundedSender<Frame>;

pub struct Session {
	conn_id: ConnectionId,
	send_tx: mpsc::Sender<Frame>,
	recv_tx: mpsc::UnboundedSender<Frame>,
	recv_rx: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
	bind_tx: Mutex<Option<oneshot::Sender<FrameSink>>>,
	state: Mutex<SessionState>,
	closed: Notify,
}

impl Session {
	/// Create a session and spawn the background task that drives its
	/// outbound queue once bound.
	pub fn spawn(conn_id: ConnectionId, queue_capacity: usize) -> std::sync::Arc<Session> {
		let (send_tx, send_rx) = mpsc::channel(queue_capacity.max(1));
		let (recv_tx, recv_rx) = mpsc::unbounded_channel();
		let (bind_tx, bind_rx) = oneshot::channel();

		let session = std::sync::Arc::new(Session {
				conn_id: conn_id.clone(),
				send_tx,
				recv_tx,
				recv_rx: Mutex::new(Some(recv_rx)),
				bind_tx: Mutex::new(Some(bind_tx)),
				state: Mutex::new(SessionState::Created),
				closed: Notify::new(),
		});

		tokio::spawn(drive_outbound(conn_id, send_rx, bind_rx));
		session
	}

	pub fn conn_id(&self) -> &ConnectionId {
		&self.conn_id
	}

	pub fn state(&self) -> SessionState {
		*self.state.lock().unwrap()
	}

	/// Enqueue a frame to be sent to the runtime container. Non-blocking:
	/// if the send queue is full, the frame is dropped and logged.
	pub fn enqueue_send(&self, frame: Frame) {
		if *self.state.lock().unwrap() == SessionState::Closed {
			debug!("session {} is closed, dropping outbound frame", self.conn_id);
			return;
		}
		if let Err(e) = self.send_tx.try_send(frame) {
			match e {
				mpsc::error::TrySendError::Full(_) => {
					warn!("session {} send queue full, dropping frame", self.conn_id)
				}
				mpsc::error::TrySendError::Closed(_) => {
					debug!("session {} send queue closed, dropping frame", self.conn_id)
				}
			}
		}
	}

	/// Bind the session to a transport connection's outbound sink. Idempotent
	/// only in the sense that a second bind attempt is a no-op (a Session has
	/// exactly one writer at a time).
	pub fn bind(&self, sink: FrameSink) {
		let sender = self.bind_tx.lock().unwrap().take();
		match sender {
			Some(tx) => {
				if tx.send(sink).is_ok() {
					*self.state.lock().unwrap() = SessionState::Bound;
					debug!("session {} bound", self.conn_id);
				}
			}
			None => warn!("session {} already bound or closed, ignoring second bind", self.conn_id),
		}
	}

	/// Place an inbound frame (other than the opening `Ready`) on the
	/// receive queue for the control plane to drain.
	pub fn push_recv(&self, frame: Frame) {
		if self.recv_tx.send(frame).is_err() {
			debug!("session {} receive queue closed, dropping inbound frame", self.conn_id);
		}
	}

	/// Take ownership of the receive queue. Can only succeed once; the
	/// Function Deployer's drain task is the sole
	/// consumer.
	pub fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<Frame>> {
		self.recv_rx.lock().unwrap().take()
	}

	/// End the session. Both queues are closed; anything still enqueued on
	/// the send side is dropped by the driver task observing the channel
	/// close.
	pub fn close(&self) {
		let mut state = self.state.lock().unwrap();
		if *state == SessionState::Closed {
			return;
		}
		*state = SessionState::Closed;
		drop(state);
		self.closed.notify_waiters();
	}

	pub async fn closed(&self) {
		self.closed.notified().await;
	}
}

async fn drive_outbound(
	conn_id: ConnectionId,
	mut send_rx: mpsc::Receiver<Frame>,
	bind_rx: oneshot::Receiver<FrameSink>,
) {
	let sink = match bind_rx.await {
		Ok(sink) => sink,
		Err(_) => {
			debug!("session {} dropped before being bound", conn_id);
			return;
		}
	};

	while let Some(frame) = send_rx.recv().await {
		if sink.send(frame).is_err() {
			debug!("session {} writer gone, stopping outbound driver", conn_id);
			break;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn frames_enqueued_before_bind_are_flushed_in_order() {
		let conn_id = ConnectionId::new("app1", "f", 0);
		let session = Session::spawn(conn_id, 4);

		session.enqueue_send(Frame::Ack {
			correlation_id: "1".into(),
		});
		session.enqueue_send(Frame::Ack {
			correlation_id: "2".into(),
		});

		let (sink, mut rx) = mpsc::unbounded_channel();
		session.bind(sink);

		let first = rx.recv().await.unwrap();
		let second = rx.recv().await.unwrap();
		assert!(matches!(first, Frame::Ack { correlation_id } if correlation_id == "1"));
		assert!(matches!(second, Frame::Ack { correlation_id } if correlation_id == "2"));
	}

	#[tokio::test]
	async fn frames_beyond_capacity_are_dropped_not_blocked() {
		let conn_id = ConnectionId::new("app1", "f", 0);
		let session = Session::spawn(conn_id, 4);

		for i in 0..6 {
			session.enqueue_send(Frame::Ack {
				correlation_id: i.to_string(),
			});
		}

		let (sink, mut rx) = mpsc::unbounded_channel();
		session.bind(sink);

		let mut delivered = Vec::new();
		while let Ok(frame) = tokio::time::timeout(std::time::Duration::from_millis(50), rx.recv()).await {
			match frame {
				Some(Frame::Ack { correlation_id }) => delivered.push(correlation_id),
				_ => break,
			}
		}

		assert_eq!(delivered.len(), 4);
		assert_eq!(delivered, vec!["0", "1", "2", "3"]);
	}

	#[tokio::test]
	async fn take_receiver_only_succeeds_once() {
		let conn_id = ConnectionId::new("app1", "f", 0);
		let session = Session::spawn(conn_id, 4);
		assert!(session.take_receiver().is_some());
		assert!(session.take_receiver().is_none());
	}

	#[tokio::test]
	async fn close_is_one_shot() {
		let conn_id = ConnectionId::new("app1", "f", 0);
		let session = Session::spawn(conn_id, 4);
		session.close();
		assert_eq!(session.state(), SessionState::Closed);
		session.close();
		assert_eq!(session.state(), SessionState::Closed);
	}
}
