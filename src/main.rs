//! Binary entrypoint: CLI/config resolution, component wiring, and the
//! top-level shutdown sequence.

mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use config::{Cli, Config};
use rotaproxy_core::signal::Shutdown;
use rotaproxy_proxy::forward::ForwardEngine;
use rotaproxy_proxy::pool::UpstreamPool;
use rotaproxy_proxy::refresher::Refresher;
use rotaproxy_proxy::rotator::Rotator;
use rotaproxy_proxy::source::{ProxySource, UrlListSource, VendorConfig, VendorSource};
use rotaproxy_proxy::supervisor::{Supervisor, TaskHandle};
use rotaproxy_proxy::tunnel::TunnelEngine;
use rotaproxy_proxy::validator::Validator;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	rotaproxy_core::telemetry::init();

	let cli = Cli::parse();
	let config = match Config::resolve(cli) {
		Ok(c) => c,
		Err(e) => {
			error!(error = %e, "invalid configuration");
			std::process::exit(1);
		},
	};

	let pool = Arc::new(UpstreamPool::new());
	if let Err(e) = pool.load_from_file(&config.proxy_file) {
		error!(error = %e, path = %config.proxy_file.display(), "failed to load proxy list");
		std::process::exit(1);
	}
	info!(count = pool.len(), "proxy list loaded");

	let listen_addr: SocketAddr = match format!("{}:{}", config.listen_host, config.listen_port).parse() {
		Ok(addr) => addr,
		Err(e) => {
			error!(error = %e, "invalid listen address");
			std::process::exit(1);
		},
	};

	let (rotator_trigger, rotator_watcher) = rotaproxy_core::drain::new();
	let rotator = Rotator::new(pool.clone(), config.rotation_interval);
	let rotator_join = tokio::spawn(rotator.run(rotator_watcher));
	let rotator_handle = TaskHandle {
		trigger: rotator_trigger,
		join: rotator_join,
	};

	let refresher_handle = if config.refresh_enabled {
		let source: Arc<dyn ProxySource> = match &config.vendor_config {
			Some(path) => {
				let text = std::fs::read_to_string(path)?;
				let vendor_cfg: VendorConfig = serde_yaml::from_str(&text)?;
				Arc::new(VendorSource::new(vendor_cfg))
			},
			None => Arc::new(UrlListSource::new(config.sources_file.clone())),
		};
		let validator = if config.validate_enabled {
			Some(Validator::new(config.test_target_url.clone(), config.validate_timeout))
		} else {
			None
		};
		let refresher = Refresher::new(
			pool.clone(),
			source,
			validator,
			config.proxy_file.clone(),
			config.refresh_interval,
		);
		let (trigger, watcher) = rotaproxy_core::drain::new();
		let join = tokio::spawn(refresher.run(watcher));
		Some(TaskHandle { trigger, join })
	} else {
		warn!("refresh disabled (--no-refresh)");
		None
	};

	let forward = Arc::new(ForwardEngine::new(pool.clone()));
	let tunnel = Arc::new(TunnelEngine::new(pool.clone()));
	let supervisor = Supervisor::new(listen_addr, forward, tunnel, config.health_interval);

	let shutdown = Shutdown::new();
	supervisor.run(shutdown, rotator_handle, refresher_handle).await;

	info!("shutdown complete");
	Ok(())
}
