//! Length-delimited JSON framing over a raw TCP stream. Each connection
//! carries exactly one request and one response.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use mesh_provider::ProviderError;

use crate::messages::{PeerRequest, PeerResponse};

/// Default dial/round-trip timeout for peer RPCs.
pub const RPC_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

fn framed(stream: TcpStream) -> Framed<TcpStream, LengthDelimitedCodec> {
	Framed::new(stream, LengthDelimitedCodec::new())
}

/// Dial `addr`, send `request`, await the single response, disconnect.
pub async fn call(addr: &str, request: &PeerRequest) -> Result<PeerResponse, ProviderError> {
	tokio::time::timeout(RPC_TIMEOUT, call_inner(addr, request))
		.await
		.map_err(|_| ProviderError::Transport(format!("timed out dialing {}", addr)))?
}

async fn call_inner(addr: &str, request: &PeerRequest) -> Result<PeerResponse, ProviderError> {
	let stream = TcpStream::connect(addr)
		.await
		.map_err(|e| ProviderError::Transport(format!("dial {} failed: {}", addr, e)))?;
	let mut framed = framed(stream);

	let encoded = serde_json::to_vec(request)
		.map_err(|e| ProviderError::Transport(format!("encode request: {}", e)))?;
	framed
		.send(Bytes::from(encoded))
		.await
		.map_err(|e| ProviderError::Transport(format!("send to {} failed: {}", addr, e)))?;

	let frame = framed
		.next()
		.await
		.ok_or_else(|| ProviderError::Transport(format!("{} closed without responding", addr)))?
		.map_err(|e| ProviderError::Transport(format!("read from {} failed: {}", addr, e)))?;

	serde_json::from_slice(&frame)
		.map_err(|e| ProviderError::Transport(format!("decode response from {}: {}", addr, e)))
}

/// Read one request, invoke `handler`, write the response, then let the
/// connection drop. Used by the server's per-connection accept loop.
pub async fn serve_one<F, Fut>(stream: TcpStream, handler: F) -> std::io::Result<()>
where
	F: FnOnce(PeerRequest) -> Fut,
	Fut: std::future::Future<Output = PeerResponse>,
{
	let mut framed = framed(stream);

	let frame = match framed.next().await {
		Some(Ok(frame)) => frame,
		Some(Err(e)) => return Err(e),
		None => return Ok(()),
	};

	let request: PeerRequest = match serde_json::from_slice(&frame) {
		Ok(req) => req,
		Err(e) => {
			tracing::warn!("peer rpc: malformed request: {}", e);
			return Ok(());
		}
	};

	let response = handler(request).await;
	let encoded = serde_json::to_vec(&response).expect("PeerResponse always serializes");
	framed.send(Bytes::from(encoded)).await?;
	Ok(())
}
