//! Session/Connection Manager : the bidirectional frame
//! stream between the control plane and a runtime container.

pub mod frame;
pub mod manager;
pub mod session;
pub mod transport;

pub use frame::Frame;
pub use manager::ConnectionManager;
pub use mesh_util::data::ActorInfo;
pub use session::{FrameSink, Session, SessionState};
pub use transport::SessionServer;
