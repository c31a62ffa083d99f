//! Bidirectional stream server that runtime containers dial back to
//!. Framing mirrors `mesh_rpc::transport`: length
//! delimited JSON, one frame per message — the difference here is that a
//! connection is long-lived and carries many frames in both directions
//! instead of a single request/response pair.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use mesh_util::background::CancelToken;
use mesh_util::data::ConnectionId;

use crate::frame::Frame;
use crate::manager::ConnectionManager;

pub struct SessionServer {
	manager: std::sync::Arc<ConnectionManager>,
}

impl SessionServer {
	pub fn new(manager: std::sync::Arc<ConnectionManager>) -> Self {
		SessionServer { manager }
	}

	/// Accept connections on `bind_addr` until `cancel` fires. Each
	/// connection is handled on its own task.
	pub async fn serve(&self, bind_addr: &str, mut cancel: CancelToken) -> std::io::Result<()> {
		let listener = TcpListener::bind(bind_addr).await?;
		info!("session server listening on {}", bind_addr);

		loop {
			tokio::select! {
				_ = cancel.cancelled() => {
					info!("session server on {} shutting down", bind_addr);
					return Ok(());
				}
				accepted = listener.accept() => {
					let (stream, peer) = match accepted {
						Ok(pair) => pair,
						Err(e) => {
							warn!("session server accept failed: {}", e);
							continue;
						}
					};
					let manager = self.manager.clone();
					tokio::spawn(async move {
							if let Err(e) = handle_connection(stream, manager).await {
								warn!("session connection from {} ended with error: {}", peer, e);
							}
					});
				}
			}
		}
	}
}

async fn handle_connection(
	stream: tokio::net::TcpStream,
	manager: std::sync::Arc<ConnectionManager>,
) -> std::io::Result<()> {
	let framed = Framed::new(stream, LengthDelimitedCodec::new());
	let (mut sink, mut stream) = framed.split();

	let opener = match stream.next().await {
		Some(Ok(bytes)) => bytes,
		Some(Err(e)) => return Err(e),
		None => return Ok(()),
	};

	let frame: Frame = match serde_json::from_slice(&opener) {
		Ok(f) => f,
		Err(e) => {
			warn!("session opener was not a valid frame: {}", e);
			return Ok(());
		}
	};

	let conn_id = match frame {
		Frame::Ready { conn_id } => ConnectionId(conn_id),
		_ => {
			warn!("first frame from runtime was not Ready, closing stream");
			return Ok(());
		}
	};

	let Some(session) = manager.get(&conn_id) else {
		warn!("no session registered for {}, closing stream", conn_id);
		return Ok(());
	};

	let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
	session.bind(out_tx);

	let writer = tokio::spawn(async move {
			while let Some(frame) = out_rx.recv().await {
				let encoded = match serde_json::to_vec(&frame) {
					Ok(bytes) => bytes,
					Err(e) => {
						warn!("failed to encode outbound frame: {}", e);
						continue;
					}
				};
				if sink.send(Bytes::from(encoded)).await.is_err() {
					break;
				}
			}
	});

	while let Some(next) = stream.next().await {
		let bytes = match next {
			Ok(b) => b,
			Err(e) => {
				debug!("session {} stream read error: {}", conn_id, e);
				break;
			}
		};
		match serde_json::from_slice::<Frame>(&bytes) {
			Ok(frame) => session.push_recv(frame),
			Err(e) => warn!("session {} received malformed frame: {}", conn_id, e),
		}
	}

	manager.close(&conn_id);
	writer.abort();
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::frame::Frame;
	use tokio::io::{AsyncReadExt, AsyncWriteExt};
	use tokio::net::TcpStream;

	async fn write_frame(stream: &mut TcpStream, frame: &Frame) {
		let encoded = serde_json::to_vec(frame).unwrap();
		let len = (encoded.len() as u32).to_be_bytes();
		stream.write_all(&len).await.unwrap();
		stream.write_all(&encoded).await.unwrap();
	}

	async fn read_frame(stream: &mut TcpStream) -> Frame {
		let mut len_buf = [0u8; 4];
		stream.read_exact(&mut len_buf).await.unwrap();
		let len = u32::from_be_bytes(len_buf) as usize;
		let mut buf = vec![0u8; len];
		stream.read_exact(&mut buf).await.unwrap();
		serde_json::from_slice(&buf).unwrap()
	}

	#[tokio::test]
	async fn runtime_connects_ready_binds_and_receives_function_frame() {
		let manager = std::sync::Arc::new(ConnectionManager::new(8));
		let conn_id = ConnectionId::new("app1", "f", 0);
		let session = manager.new_session(conn_id.clone());
		session.enqueue_send(Frame::Function {
				name: "f".into(),
				params: vec![],
				requirements: Default::default(),
				pickled_object: vec![1, 2, 3],
				language: mesh_util::data::Language::Python,
		});

		let server = SessionServer::new(manager.clone());
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		drop(listener);

		let bind_addr = addr.to_string();
		let (cancel_handle, cancel_token) = mesh_util::background::cancel_pair();
		let server_addr = bind_addr.clone();
		let handle = tokio::spawn(async move {
				server.serve(&server_addr, cancel_token).await.unwrap();
		});
		tokio::time::sleep(std::time::Duration::from_millis(50)).await;

		let mut stream = TcpStream::connect(&bind_addr).await.unwrap();
		write_frame(
			&mut stream,
			&Frame::Ready {
				conn_id: conn_id.0.clone(),
			})
		.await;

		let received = read_frame(&mut stream).await;
		assert!(matches!(received, Frame::Function { name,.. } if name == "f"));

		cancel_handle.cancel();
		let _ = handle.await;
	}
}
