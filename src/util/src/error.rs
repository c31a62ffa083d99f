//! Error types shared by every crate in the workspace.
//!
//! `Error` is the generic internal error used within a single crate to wrap
//! whatever its own backend throws (I/O, serde, a container engine client,
//!...). `ControlError` is the small, closed set of error *kinds* that must
//! be distinguishable to a caller (REST handler, RPC response, CLI) — every
//! internal error is converted into one of these at the boundary where it
//! leaves the node's own plumbing.

use err_derive::Error;

/// Generic internal error used within a single crate.
#[derive(Debug, Error)]
pub enum Error {
	#[error(display = "{}", _0)]
	Message(String),

	#[error(display = "IO error: {}", _0)]
	Io(#[error(source)] std::io::Error),

	#[error(display = "JSON error: {}", _0)]
	Json(#[error(source)] serde_json::Error),

	#[error(display = "TOML parse error: {}", _0)]
	Toml(#[error(source)] toml::de::Error),
}

impl From<&str> for Error {
	fn from(v: &str) -> Error {
		Error::Message(v.into())
	}
}

impl From<String> for Error {
	fn from(v: String) -> Error {
		Error::Message(v)
	}
}

/// Turns an `Option` into a `Result` with a textual error, and attaches
/// additional context to an existing error without losing the source.
pub trait OkOrMessage<T> {
	fn ok_or_message<M: Into<String>>(self, message: M) -> Result<T, Error>;
}

impl<T> OkOrMessage<T> for Option<T> {
	fn ok_or_message<M: Into<String>>(self, message: M) -> Result<T, Error> {
		self.ok_or_else(|| Error::Message(message.into()))
	}
}

impl<T, E: std::fmt::Display> OkOrMessage<T> for Result<T, E> {
	fn ok_or_message<M: Into<String>>(self, message: M) -> Result<T, Error> {
		self.map_err(|e| Error::Message(format!("{}: {}", message.into(), e)))
	}
}

pub trait ErrorContext<T> {
	fn err_context<M: Into<String>>(self, context: M) -> Result<T, Error>;
}

impl<T, E: Into<Error>> ErrorContext<T> for Result<T, E> {
	fn err_context<M: Into<String>>(self, context: M) -> Result<T, Error> {
		self.map_err(|e| Error::Message(format!("{}: {}", context.into(), e.into())))
	}
}

/// The closed set of error kinds surfaced to users.
///
/// Every layer below the REST handler (providers, the registry, the
/// deployer) maps its own internal errors into one of these before handing
/// them further up; internal loops (gossip, monitor, session drivers)
/// never produce a `ControlError` at all — they log and swallow.
#[derive(Debug, Error, Clone)]
pub enum ControlError {
	#[error(display = "configuration error: {}", _0)]
	ConfigError(String),

	#[error(display = "no eligible provider could satisfy the requested resources")]
	ResourceLimitExceeded,

	#[error(display = "deployment backend error: {}", _0)]
	DeploymentBackendError(String),

	#[error(display = "provider not found: {}", _0)]
	ProviderNotFound(String),

	#[error(display = "request carried the wrong provider id")]
	AuthMismatch,

	#[error(display = "backend unreachable: {}", _0)]
	BackendUnreachable(String),

	#[error(display = "invalid request: {}", _0)]
	InvalidRequest(String),
}

impl From<Error> for ControlError {
	fn from(e: Error) -> ControlError {
		ControlError::BackendUnreachable(e.to_string())
	}
}
