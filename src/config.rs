//! CLI surface and YAML config overlay. Precedence: CLI flag > YAML
//! file value > built-in default.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

#[derive(Debug, Parser)]
#[command(name = "rotaproxy", about = "Rotating HTTP/HTTPS forward proxy")]
pub struct Cli {
	#[arg(long)]
	pub listen_host: Option<String>,
	#[arg(long)]
	pub listen_port: Option<u16>,
	#[arg(long)]
	pub proxy_file: Option<PathBuf>,
	#[arg(long)]
	pub rotation_interval: Option<String>,
	#[arg(long)]
	pub refresh_interval: Option<String>,
	#[arg(long)]
	pub no_refresh: bool,
	#[arg(long)]
	pub sources_file: Option<PathBuf>,
	#[arg(long)]
	pub no_validate: bool,
	#[arg(long)]
	pub validate_timeout: Option<String>,
	#[arg(long)]
	pub test_target_url: Option<String>,
	#[arg(long)]
	pub vendor_config: Option<PathBuf>,
	#[arg(long)]
	pub health_interval: Option<String>,
	#[arg(short, long)]
	pub config: Option<PathBuf>,
}

/// The YAML overlay document read from `--config`. Every field optional;
/// anything absent falls through to the CLI default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YamlOverlay {
	pub listen_host: Option<String>,
	pub listen_port: Option<u16>,
	pub proxy_file: Option<PathBuf>,
	pub rotation_interval: Option<String>,
	pub refresh_interval: Option<String>,
	pub no_refresh: Option<bool>,
	pub sources_file: Option<PathBuf>,
	pub no_validate: Option<bool>,
	pub validate_timeout: Option<String>,
	pub test_target_url: Option<String>,
	pub vendor_config: Option<PathBuf>,
	pub health_interval: Option<String>,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
	pub listen_host: String,
	pub listen_port: u16,
	pub proxy_file: PathBuf,
	pub rotation_interval: Duration,
	pub refresh_enabled: bool,
	pub refresh_interval: Duration,
	pub sources_file: PathBuf,
	pub validate_enabled: bool,
	pub validate_timeout: Duration,
	pub test_target_url: String,
	pub vendor_config: Option<PathBuf>,
	pub health_interval: Duration,
}

impl Config {
	pub fn resolve(cli: Cli) -> anyhow::Result<Config> {
		let overlay = match &cli.config {
			Some(path) => {
				let text = std::fs::read_to_string(path)
					.map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.display()))?;
				serde_yaml::from_str::<YamlOverlay>(&text)
					.map_err(|e| anyhow::anyhow!("parsing config file {}: {e}", path.display()))?
			},
			None => YamlOverlay::default(),
		};

		let listen_host = cli
			.listen_host
			.or(overlay.listen_host)
			.unwrap_or_else(|| "127.0.0.1".to_string());
		let listen_port = cli.listen_port.or(overlay.listen_port).unwrap_or(8888);
		let proxy_file = cli
			.proxy_file
			.or(overlay.proxy_file)
			.unwrap_or_else(|| PathBuf::from("proxy_list.txt"));
		let rotation_interval = parse_duration(
			cli.rotation_interval.or(overlay.rotation_interval),
			"9s",
		)?;
		let refresh_interval = parse_duration(
			cli.refresh_interval.or(overlay.refresh_interval),
			"300s",
		)?;
		let refresh_enabled = !(cli.no_refresh || overlay.no_refresh.unwrap_or(false));
		let sources_file = cli
			.sources_file
			.or(overlay.sources_file)
			.unwrap_or_else(|| PathBuf::from("proxy_sources.txt"));
		let validate_enabled = !(cli.no_validate || overlay.no_validate.unwrap_or(false));
		let validate_timeout = parse_duration(cli.validate_timeout.or(overlay.validate_timeout), "5s")?;
		let test_target_url = cli
			.test_target_url
			.or(overlay.test_target_url)
			.unwrap_or_else(|| "http://httpbin.org/ip".to_string());
		let vendor_config = cli.vendor_config.or(overlay.vendor_config);
		let health_interval = parse_duration(cli.health_interval.or(overlay.health_interval), "60s")?;

		Ok(Config {
			listen_host,
			listen_port,
			proxy_file,
			rotation_interval,
			refresh_enabled,
			refresh_interval,
			sources_file,
			validate_enabled,
			validate_timeout,
			test_target_url,
			vendor_config,
			health_interval,
		})
	}
}

fn parse_duration(raw: Option<String>, default: &str) -> anyhow::Result<Duration> {
	let raw = raw.as_deref().unwrap_or(default);
	duration_str::parse(raw).map_err(|e| anyhow::anyhow!("invalid duration {raw:?}: {e}"))
}
