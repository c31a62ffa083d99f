//! Timestamp helpers shared across the workspace.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in milliseconds since the Unix epoch.
pub fn now_msec() -> i64 {
	let now = SystemTime::now()
.duration_since(UNIX_EPOCH)
.expect("system clock before 1970");
	now.as_millis() as i64
}

/// Milliseconds elapsed since `since`, saturating at zero.
pub fn msec_since(since: i64) -> i64 {
	(now_msec() - since).max(0)
}
