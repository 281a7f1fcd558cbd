//! Concurrent reachability probing. Pure with respect to pool state:
//! takes candidate strings, returns the subset that passed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

const DEFAULT_MAX_IN_FLIGHT: usize = 20;

pub struct Validator {
	test_target_url: String,
	timeout: Duration,
	max_in_flight: usize,
}

impl Validator {
	pub fn new(test_target_url: String, timeout: Duration) -> Self {
		Validator {
			test_target_url,
			timeout,
			max_in_flight: DEFAULT_MAX_IN_FLIGHT,
		}
	}

	pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
		self.max_in_flight = max_in_flight;
		self
	}

	/// Returns the subset of `candidates` that completed a GET to
	/// `test_target_url` through that candidate with HTTP 200 within
	/// `timeout`. Any other outcome (connect failure, non-200, timeout)
	/// drops the candidate.
	pub async fn validate(&self, candidates: Vec<String>) -> Vec<String> {
		let semaphore = Arc::new(Semaphore::new(self.max_in_flight.max(1)));
		let mut set = JoinSet::new();
		let total = candidates.len();
		for candidate in candidates {
			let semaphore = semaphore.clone();
			let target = self.test_target_url.clone();
			let timeout = self.timeout;
			set.spawn(async move {
				let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
				let ok = probe(&candidate, &target, timeout).await;
				(candidate, ok)
			});
		}

		let mut survivors = Vec::new();
		let mut tested = 0;
		while let Some(res) = set.join_next().await {
			tested += 1;
			if let Ok((candidate, true)) = res {
				survivors.push(candidate);
			}
		}
		debug!(tested, total, survivors = survivors.len(), "validation pass complete");
		survivors
	}
}

async fn probe(candidate: &str, test_target_url: &str, timeout: Duration) -> bool {
	let proxy = match reqwest::Proxy::http(candidate) {
		Ok(p) => p,
		Err(_) => return false,
	};
	let client = match reqwest::Client::builder()
		.proxy(proxy)
		.timeout(timeout)
		.build()
	{
		Ok(c) => c,
		Err(_) => return false,
	};
	matches!(client.get(test_target_url).send().await, Ok(resp) if resp.status() == reqwest::StatusCode::OK)
}

#[cfg(test)]
mod test {
	use tokio::io::{AsyncReadExt, AsyncWriteExt};
	use tokio::net::TcpListener;

	use super::*;

	/// A "proxy" that always replies 200 to anything, so probes through it
	/// succeed regardless of target.
	async fn spawn_always_ok_proxy() -> String {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			loop {
				let Ok((mut sock, _)) = listener.accept().await else { break };
				tokio::spawn(async move {
					let mut buf = [0u8; 4096];
					let _ = sock.read(&mut buf).await;
					let body = "ok";
					let resp = format!(
						"HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
						body.len(),
						body
					);
					let _ = sock.write_all(resp.as_bytes()).await;
				});
			}
		});
		format!("{addr}")
	}

	async fn spawn_always_fail_listener() -> String {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			loop {
				let Ok((mut sock, _)) = listener.accept().await else { break };
				let _ = sock.shutdown().await;
			}
		});
		format!("{addr}")
	}

	#[tokio::test]
	async fn validate_keeps_reachable_drops_unreachable() {
		let good = spawn_always_ok_proxy().await;
		let bad = spawn_always_fail_listener().await;
		let validator = Validator::new("http://example.invalid/ip".to_string(), Duration::from_secs(2));
		let survivors = validator.validate(vec![good.clone(), bad]).await;
		assert_eq!(survivors, vec![good]);
	}

	#[tokio::test]
	async fn validate_empty_list_returns_empty() {
		let validator = Validator::new("http://example.invalid/ip".to_string(), Duration::from_secs(1));
		assert!(validator.validate(vec![]).await.is_empty());
	}
}
