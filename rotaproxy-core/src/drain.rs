//! Graceful shutdown/draining support.
//!
//! A [`DrainTrigger`] starts a drain and waits for every outstanding
//! [`DrainWatcher`] to be dropped. Anything that wants to participate in
//! the drain (an accepted connection, a periodic task) holds a cloned
//! `DrainWatcher` for the duration of its work; the drain can only
//! complete once every clone has been released.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Constructs a new drain pair. `DrainTrigger` starts a drain; `DrainWatcher`
/// should be cloned and held by anything that wants to delay it.
pub fn new() -> (DrainTrigger, DrainWatcher) {
	let (signal_tx, signal_rx) = watch::channel(false);
	let (drained_tx, drained_rx) = mpsc::channel(1);
	(
		DrainTrigger {
			signal_tx,
			drained_rx,
		},
		DrainWatcher {
			signal_rx,
			drained_tx,
		},
	)
}

enum Never {}

/// Send a drain command to all watchers and wait for them to release.
pub struct DrainTrigger {
	signal_tx: watch::Sender<bool>,
	drained_rx: mpsc::Receiver<Never>,
}

impl DrainTrigger {
	/// Signal every watcher to begin draining and wait for all of them to
	/// be dropped, or for `deadline` to elapse, whichever comes first.
	pub async fn start_drain_and_wait(mut self, component: &str, deadline: Duration) {
		let _ = self.signal_tx.send(true);
		info!(component, ?deadline, "drain started, waiting for tasks to finish");
		if tokio::time::timeout(deadline, self.drained_rx.recv())
			.await
			.is_err()
		{
			warn!(component, "drain deadline exceeded with tasks still outstanding");
		} else {
			debug!(component, "drain completed cleanly");
		}
	}
}

/// Held by a task that should delay a drain until it finishes.
#[derive(Clone)]
pub struct DrainWatcher {
	signal_rx: watch::Receiver<bool>,
	drained_tx: mpsc::Sender<Never>,
}

impl DrainWatcher {
	/// Resolves once a drain has been signaled. The caller should stop
	/// accepting new work and, once existing work is done, drop `self`.
	pub async fn signaled(&mut self) {
		let _ = self.signal_rx.wait_for(|v| *v).await;
	}

	/// True if a drain has already been signaled (non-blocking).
	pub fn is_signaled(&self) -> bool {
		*self.signal_rx.borrow()
	}
}

#[cfg(test)]
mod test {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	#[tokio::test]
	async fn drain_waits_for_all_watchers() {
		let (trigger, watcher) = new();
		let done = Arc::new(AtomicUsize::new(0));

		for i in 1..=3u64 {
			let mut w = watcher.clone();
			let done = done.clone();
			tokio::spawn(async move {
				w.signaled().await;
				tokio::time::sleep(Duration::from_millis(i * 5)).await;
				done.fetch_add(1, Ordering::SeqCst);
				drop(w);
			});
		}
		drop(watcher);

		trigger
			.start_drain_and_wait("test", Duration::from_secs(1))
			.await;
		assert_eq!(done.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn drain_times_out_with_stuck_watcher() {
		let (trigger, watcher) = new();
		let stuck = watcher.clone();
		drop(watcher);
		tokio::spawn(async move {
			let _stuck = stuck;
			tokio::time::sleep(Duration::from_secs(5)).await;
		});

		// Should return promptly at the deadline rather than hang.
		let start = tokio::time::Instant::now();
		trigger
			.start_drain_and_wait("test", Duration::from_millis(20))
			.await;
		assert!(start.elapsed() < Duration::from_secs(1));
	}
}
