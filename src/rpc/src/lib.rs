//! Peer fabric: gossip membership, the peer RPC server
//! (§4.7), and the Remote Provider proxy (§4.3).
//!
//! Transport is a simple one-request-per-connection protocol over TCP:
//! dial, write a length-delimited JSON-encoded [`PeerRequest`], read a
//! length-delimited JSON-encoded [`PeerResponse`], disconnect. There is no
//! session reuse and no pipelining — a gossip round or a `CallProvider`
//! forward is cheap enough that the connection overhead does not matter,
//! and the framing stays trivial to reason about.

pub mod messages;
pub mod peer_manager;
pub mod remote_proxy;
pub mod server;
pub mod transport;

pub use messages::{CallProviderArgs, PeerRequest, PeerResponse, ProviderSummary};
pub use peer_manager::PeerManager;
pub use remote_proxy::RemoteProxy;
pub use server::{Dispatch, RpcServer};
