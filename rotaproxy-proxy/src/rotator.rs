//! Periodic random reselection of the pool's current upstream. A single
//! task distinct from the Refresher; never touches the listening
//! endpoint.

use std::sync::Arc;
use std::time::Duration;

use rotaproxy_core::drain::DrainWatcher;
use tracing::debug;

use crate::pool::UpstreamPool;

pub struct Rotator {
	pool: Arc<UpstreamPool>,
	interval: Duration,
}

impl Rotator {
	pub fn new(pool: Arc<UpstreamPool>, interval: Duration) -> Self {
		Rotator { pool, interval }
	}

	/// Runs until `watcher` signals a drain. Checks the stop flag between
	/// ticks only, never mid-tick.
	pub async fn run(self, mut watcher: DrainWatcher) {
		let mut ticker = tokio::time::interval(self.interval);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		ticker.tick().await; // first tick fires immediately; skip it
		loop {
			tokio::select! {
				_ = ticker.tick() => {
					debug!("rotator tick");
					self.pool.reseed_current();
				}
				_ = watcher.signaled() => {
					debug!("rotator stopping");
					return;
				}
			}
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::upstream::Upstream;

	#[tokio::test(start_paused = true)]
	async fn rotates_over_multiple_ticks_with_enough_candidates() {
		let pool = Arc::new(UpstreamPool::new());
		pool.replace(
			["a:1", "b:2", "c:3", "d:4"]
				.iter()
				.map(|s| Upstream::parse(s).unwrap())
				.collect(),
		);
		let (trigger, watcher) = rotaproxy_core::drain::new();
		let rotator = Rotator::new(pool.clone(), Duration::from_millis(1));
		let handle = tokio::spawn(rotator.run(watcher));

		let mut seen = std::collections::HashSet::new();
		for _ in 0..50 {
			tokio::time::advance(Duration::from_millis(1)).await;
			tokio::task::yield_now().await;
			if let Some(cur) = pool.current() {
				seen.insert(cur.as_str().to_string());
			}
		}
		assert!(seen.len() >= 2, "expected rotation across at least 2 upstreams, saw {seen:?}");

		trigger.start_drain_and_wait("rotator", Duration::from_secs(1)).await;
		handle.await.unwrap();
	}
}
