//! Small cooperative-cancellation helper used by every periodic loop
//! (gossip, monitor, session drivers): a `watch::Receiver<bool>` carrying a
//! "must exit" signal, checked between ticks and on every wakeup.

use std::time::Duration;

use tokio::sync::watch;

/// Handle used to request shutdown of every task built on `CancelToken`.
#[derive(Clone)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
	pub fn cancel(&self) {
		let _ = self.0.send(true);
	}
}

/// Per-task view of the cancellation signal.
#[derive(Clone)]
pub struct CancelToken(watch::Receiver<bool>);

impl CancelToken {
	pub fn is_cancelled(&self) -> bool {
		*self.0.borrow()
	}

	/// Resolves once cancellation has been requested.
	pub async fn cancelled(&mut self) {
		while !*self.0.borrow() {
			if self.0.changed().await.is_err() {
				// Sender dropped: treat as cancellation.
				return;
			}
		}
	}
}

/// Create a fresh cancellation pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
	let (tx, rx) = watch::channel(false);
	(CancelHandle(tx), CancelToken(rx))
}

/// Run `step` on a fixed period until cancellation is requested. `step` runs
/// to completion before the next tick is scheduled (no overlapping runs).
pub async fn run_periodic<F, Fut>(period: Duration, mut cancel: CancelToken, mut step: F)
where
	F: FnMut() -> Fut,
	Fut: std::future::Future<Output = ()>,
{
	while !cancel.is_cancelled() {
		step().await;

		tokio::select! {
			_ = tokio::time::sleep(period) => {},
			_ = cancel.cancelled() => {},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	#[tokio::test(start_paused = true)]
	async fn periodic_loop_stops_on_cancel() {
		let (handle, token) = cancel_pair();
		let count = Arc::new(AtomicUsize::new(0));
		let count2 = count.clone();

		let task = tokio::spawn(run_periodic(Duration::from_millis(10), token, move || {
					let count2 = count2.clone();
					async move {
						count2.fetch_add(1, Ordering::SeqCst);
					}
		}));

		tokio::time::sleep(Duration::from_millis(35)).await;
		handle.cancel();
		let _ = tokio::time::timeout(Duration::from_secs(1), task).await;

		assert!(count.load(Ordering::SeqCst) >= 1);
	}
}
