//! Orchestrates the listening endpoint's lifecycle: warmup, periodic
//! self-probe, and restart-on-failure. Grounded on `proxy_c2.py`'s
//! probe/restart loop, adapted from supervising a child process to
//! supervising an in-process task (see DESIGN.md).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rotaproxy_core::drain;
use rotaproxy_core::signal::Shutdown;
use tracing::{error, info, warn};

use crate::forward::ForwardEngine;
use crate::server::ProxyServer;
use crate::tunnel::TunnelEngine;

const WARMUP: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const RESTART_GRACE: Duration = Duration::from_secs(10);
const FAILURE_THRESHOLD: u32 = 3;
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Fixed public "echo IP" URL the Supervisor probes through its own
/// listener to confirm the serving path is alive end to end.
const ECHO_PROBE_URL: &str = "https://api.ipify.org";

pub struct Supervisor {
	listen_addr: SocketAddr,
	forward: Arc<ForwardEngine>,
	tunnel: Arc<TunnelEngine>,
	health_interval: Duration,
}

/// A background task's drain trigger paired with its join handle. Used
/// uniformly for the listener, the Rotator, and the Refresher.
pub struct TaskHandle {
	pub trigger: drain::DrainTrigger,
	pub join: tokio::task::JoinHandle<()>,
}

impl Supervisor {
	pub fn new(
		listen_addr: SocketAddr,
		forward: Arc<ForwardEngine>,
		tunnel: Arc<TunnelEngine>,
		health_interval: Duration,
	) -> Self {
		Supervisor {
			listen_addr,
			forward,
			tunnel,
			health_interval,
		}
	}

	/// Runs until `shutdown` fires. `rotator` and `refresher` are started
	/// by the caller and keep running across serving restarts; on
	/// shutdown this joins them (5s each) after the listener has drained.
	pub async fn run(&self, mut shutdown: Shutdown, rotator: TaskHandle, refresher: Option<TaskHandle>) {
		let mut serving = self.spawn_serving();
		tokio::time::sleep(WARMUP).await;

		let mut failures = 0u32;
		let probe_client = reqwest::Client::builder()
			.proxy(reqwest::Proxy::all(format!("http://{}", self.listen_addr)).expect("proxy url is valid"))
			.timeout(PROBE_TIMEOUT)
			.build()
			.expect("reqwest client builds");

		let shutdown_fut = shutdown.wait();
		tokio::pin!(shutdown_fut);

		loop {
			tokio::select! {
				_ = tokio::time::sleep(self.health_interval) => {
					match probe_client.get(ECHO_PROBE_URL).send().await {
						Ok(resp) if resp.status().is_success() => {
							failures = 0;
						}
						Ok(resp) => {
							failures += 1;
							warn!(status = %resp.status(), failures, "health probe returned non-success");
						}
						Err(e) => {
							failures += 1;
							warn!(error = %e, failures, "health probe failed");
						}
					}
					if failures >= FAILURE_THRESHOLD {
						warn!("three consecutive probe failures, restarting serving engine");
						serving = self.restart(serving).await;
						failures = 0;
					}
				}
				_ = &mut shutdown_fut => {
					info!("supervisor shutting down");
					break;
				}
			}
		}

		serving.trigger.start_drain_and_wait("proxy-server", JOIN_TIMEOUT).await;
		serving.join.abort();

		rotator.trigger.start_drain_and_wait("rotator", JOIN_TIMEOUT).await;
		if tokio::time::timeout(JOIN_TIMEOUT, rotator.join).await.is_err() {
			warn!("rotator did not join within timeout");
		}
		if let Some(refresher) = refresher {
			refresher.trigger.start_drain_and_wait("refresher", JOIN_TIMEOUT).await;
			if tokio::time::timeout(JOIN_TIMEOUT, refresher.join).await.is_err() {
				warn!("refresher did not join within timeout");
			}
		}
	}

	fn spawn_serving(&self) -> TaskHandle {
		let (trigger, watcher) = drain::new();
		let server = ProxyServer::new(self.listen_addr, self.forward.clone(), self.tunnel.clone());
		let join = tokio::spawn(async move {
			if let Err(e) = server.serve(watcher).await {
				error!(error = %e, "proxy server exited with error");
			}
		});
		TaskHandle { trigger, join }
	}

	/// Stops the current listener (graceful, then force-abort after the
	/// grace period) and only then rebuilds it. The old listener must be
	/// fully drained and dropped before the replacement binds — otherwise
	/// the new bind on the same address races the old accept loop, which
	/// still holds the socket, and fails with `EADDRINUSE`, leaving no
	/// listener at all.
	async fn restart(&self, old: TaskHandle) -> TaskHandle {
		let drained = tokio::time::timeout(RESTART_GRACE, async {
			old.trigger.start_drain_and_wait("proxy-server", RESTART_GRACE).await;
		})
		.await;
		if drained.is_err() {
			warn!("serving engine did not drain within grace period, forcing abort");
		}
		old.join.abort();
		self.spawn_serving()
	}
}
