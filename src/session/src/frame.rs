//! Wire frame types carried on the bidirectional stream between the
//! control plane and a runtime container. Frames are exchanged as length-delimited JSON, the same framing
//! discipline `mesh_rpc` uses for the peer protocol — trivial to reason
//! about, at the cost of some wire-size efficiency we don't need here.

use serde::{Deserialize, Serialize};

use mesh_util::data::{ActorInfo, Language, ResourceInfo};

/// A single frame on a session stream. The first frame a runtime container
/// ever sends MUST be `Ready`; anything else in that position is a
/// protocol error and the stream is closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
	/// runtime -> cp: announces the connection-id the runtime was told to
	/// dial back with (the `CONN_ID` environment variable).
	Ready { conn_id: String },

	/// cp -> runtime: the function body to execute, flushed once the
	/// session is bound.
	Function {
		name: String,
		params: Vec<String>,
		requirements: ResourceInfo,
		#[serde(with = "serde_bytes")]
		pickled_object: Vec<u8>,
		language: Language,
	},

	/// cp -> runtime: invoke a single parameter on a target actor within an
	/// existing invocation session.
	Invoke {
		target_actor_id: String,
		session_id: String,
		param_name: String,
		#[serde(with = "serde_bytes")]
		value_blob: Vec<u8>,
	},

	/// cp -> runtime: start a fresh invocation, addressed to the actor
	/// described by `actor_info`.
	InvokeStart { actor_info: ActorInfo, session_id: String },

	/// Both directions: store-protocol frames, opaque at this layer
	///.
	ObjectRequest {
		request_id: String,
		#[serde(with = "serde_bytes")]
		payload: Vec<u8>,
	},
	ObjectResponse {
		request_id: String,
		#[serde(with = "serde_bytes")]
		payload: Vec<u8>,
	},
	StreamChunk {
		stream_id: String,
		seq: u64,
		#[serde(with = "serde_bytes")]
		payload: Vec<u8>,
		end: bool,
	},

	/// runtime -> cp: the result of an invocation.
	Return {
		session_id: String,
		#[serde(with = "serde_bytes")]
		result_blob: Vec<u8>,
	},

	/// Either direction: acknowledges a prior frame by correlation id.
	Ack { correlation_id: String },
}

impl Frame {
	/// Whether this frame is the one and only valid opener for a runtime ->
	/// cp stream.
	pub fn is_ready(&self) -> bool {
		matches!(self, Frame::Ready {.. })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ready_frame_round_trips_through_json() {
		let frame = Frame::Ready { conn_id: "app1:f-0".into() };
		let encoded = serde_json::to_vec(&frame).unwrap();
		let decoded: Frame = serde_json::from_slice(&encoded).unwrap();
		assert!(decoded.is_ready());
	}

	#[test]
	fn non_ready_frame_is_not_a_valid_opener() {
		let frame = Frame::Ack {
			correlation_id: "x".into(),
		};
		assert!(!frame.is_ready());
	}
}
