//! Periodic external-source pull, optional validation, and proxy-list
//! rewrite. Runs on its own tick loop, independent of the Rotator.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rotaproxy_core::drain::DrainWatcher;
use tracing::{info, warn};

use crate::pool::{UpstreamPool, write_refreshed_file};
use crate::source::ProxySource;
use crate::upstream::parse_and_dedup;
use crate::validator::Validator;

pub struct Refresher {
	pool: Arc<UpstreamPool>,
	source: Arc<dyn ProxySource>,
	validator: Option<Validator>,
	proxy_list_path: PathBuf,
	interval: Duration,
}

impl Refresher {
	pub fn new(
		pool: Arc<UpstreamPool>,
		source: Arc<dyn ProxySource>,
		validator: Option<Validator>,
		proxy_list_path: PathBuf,
		interval: Duration,
	) -> Self {
		Refresher {
			pool,
			source,
			validator,
			proxy_list_path,
			interval,
		}
	}

	/// Runs until `watcher` signals a drain, checking the stop flag
	/// between ticks only.
	pub async fn run(self, mut watcher: DrainWatcher) {
		let mut ticker = tokio::time::interval(self.interval);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		ticker.tick().await; // first tick fires immediately; skip it
		loop {
			tokio::select! {
				_ = ticker.tick() => {
					self.run_once("scheduled").await;
				}
				_ = watcher.signaled() => {
					info!("refresher stopping");
					return;
				}
			}
		}
	}

	/// One refresh cycle: fetch, dedup, optionally validate, persist, and
	/// reload the pool from what was persisted. On fetch failure or an
	/// empty result, the existing list is left unchanged.
	pub async fn run_once(&self, timestamp: &str) {
		let fetched = match self.source.fetch().await {
			Ok(f) => f,
			Err(e) => {
				warn!(error = %e, "refresh cycle: source fetch failed, leaving list unchanged");
				return;
			},
		};
		if fetched.is_empty() {
			warn!("refresh cycle: source returned no candidates, leaving list unchanged");
			return;
		}

		let deduped = parse_and_dedup(fetched);
		if deduped.is_empty() {
			warn!("refresh cycle: no candidates parsed as valid upstreams, leaving list unchanged");
			return;
		}

		let (final_list, validated) = if self.source.skip_validation() {
			(deduped, false)
		} else if let Some(validator) = &self.validator {
			let candidates: Vec<String> = deduped.iter().map(|u| u.as_str().to_string()).collect();
			let survivors = validator.validate(candidates).await;
			let survivors = parse_and_dedup(survivors);
			if survivors.is_empty() {
				warn!("refresh cycle: all candidates failed validation, leaving list unchanged");
				return;
			}
			(survivors, true)
		} else {
			(deduped, false)
		};

		match write_refreshed_file(&self.proxy_list_path, &final_list, timestamp, validated) {
			Ok(()) => {},
			Err(e) => {
				warn!(error = %e, "refresh cycle: failed writing proxy list file");
				return;
			},
		}

		match self.pool.load_from_file(&self.proxy_list_path) {
			Ok(count) => info!(count, validated, "refresh cycle complete"),
			Err(e) => warn!(error = %e, "refresh cycle: failed reloading pool from disk"),
		}
	}
}

#[cfg(test)]
mod test {
	use async_trait::async_trait;

	use super::*;
	use crate::error::SourceError;

	struct StaticSource(Vec<String>);

	#[async_trait]
	impl ProxySource for StaticSource {
		async fn fetch(&self) -> Result<Vec<String>, SourceError> {
			Ok(self.0.clone())
		}

		fn skip_validation(&self) -> bool {
			true
		}
	}

	struct FailingSource;

	#[async_trait]
	impl ProxySource for FailingSource {
		async fn fetch(&self) -> Result<Vec<String>, SourceError> {
			Err(SourceError::Fatal("boom".to_string()))
		}
	}

	fn temp_path(name: &str) -> PathBuf {
		std::env::temp_dir().join(format!("rotaproxy-refresher-test-{}-{name}", std::process::id()))
	}

	#[tokio::test]
	async fn run_once_populates_pool_from_skip_validation_source() {
		let pool = Arc::new(UpstreamPool::new());
		let source = Arc::new(StaticSource(vec![
			"10.0.0.1:1".to_string(),
			"10.0.0.2:2".to_string(),
		]));
		let path = temp_path("populate");
		let _ = std::fs::remove_file(&path);
		let refresher = Refresher::new(pool.clone(), source, None, path.clone(), Duration::from_secs(60));
		refresher.run_once("2026-01-01T00:00:00Z").await;
		assert_eq!(pool.len(), 2);
		std::fs::remove_file(&path).ok();
	}

	#[tokio::test]
	async fn run_once_leaves_pool_unchanged_on_fetch_failure() {
		let pool = Arc::new(UpstreamPool::new());
		pool.replace(vec![crate::upstream::Upstream::parse("10.0.0.9:9").unwrap()]);
		let path = temp_path("failure");
		let _ = std::fs::remove_file(&path);
		let refresher = Refresher::new(pool.clone(), Arc::new(FailingSource), None, path.clone(), Duration::from_secs(60));
		refresher.run_once("2026-01-01T00:00:00Z").await;
		assert_eq!(pool.len(), 1);
		assert!(!path.exists());
	}

	#[tokio::test]
	async fn run_once_leaves_pool_unchanged_on_empty_fetch() {
		let pool = Arc::new(UpstreamPool::new());
		pool.replace(vec![crate::upstream::Upstream::parse("10.0.0.9:9").unwrap()]);
		let path = temp_path("empty");
		let _ = std::fs::remove_file(&path);
		let refresher = Refresher::new(pool.clone(), Arc::new(StaticSource(vec![])), None, path.clone(), Duration::from_secs(60));
		refresher.run_once("2026-01-01T00:00:00Z").await;
		assert_eq!(pool.len(), 1);
	}
}
