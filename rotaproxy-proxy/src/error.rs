use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamParseError {
	#[error("invalid upstream proxy format: {0:?}")]
	InvalidFormat(String),
	#[error("invalid port in upstream proxy: {0:?}")]
	InvalidPort(String),
}

#[derive(Debug, Error)]
pub enum PoolError {
	#[error("reading proxy list file: {0}")]
	Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SourceError {
	#[error("reading sources file: {0}")]
	Io(std::io::Error),
	#[error("fetching source: {0}")]
	Http(#[from] reqwest::Error),
	#[error("vendor request rate-limited, retry after {0:?}")]
	RateLimited(Duration),
	#[error("vendor request rejected: {0}")]
	Fatal(String),
}

/// Error mapping for the plain-HTTP forwarding path.
#[derive(Debug, Error)]
pub enum ForwardError {
	#[error("no upstream available")]
	NoUpstream,
	#[error("malformed downstream request: {0}")]
	Malformed(String),
	#[error("transport error talking to upstream: {0}")]
	Transport(#[from] reqwest::Error),
	#[error("timed out talking to upstream")]
	Timeout,
}

impl ForwardError {
	/// The status code to send to the downstream client.
	pub fn status_code(&self) -> http::StatusCode {
		match self {
			ForwardError::NoUpstream => http::StatusCode::SERVICE_UNAVAILABLE,
			ForwardError::Malformed(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
			ForwardError::Transport(_) => http::StatusCode::BAD_GATEWAY,
			ForwardError::Timeout => http::StatusCode::GATEWAY_TIMEOUT,
		}
	}
}

/// Error mapping for the CONNECT tunneling path.
#[derive(Debug, Error)]
pub enum TunnelError {
	#[error("no upstream available")]
	NoUpstream,
	#[error("malformed CONNECT target: {0:?}")]
	MalformedTarget(String),
	#[error("connecting to upstream proxy: {0}")]
	Connect(#[from] std::io::Error),
	#[error("connecting to upstream proxy timed out")]
	ConnectTimeout,
	#[error("upstream proxy rejected CONNECT: {0}")]
	UpstreamRejected(String),
}

impl TunnelError {
	pub fn status_code(&self) -> http::StatusCode {
		match self {
			TunnelError::NoUpstream => http::StatusCode::SERVICE_UNAVAILABLE,
			TunnelError::MalformedTarget(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
			TunnelError::Connect(_) => http::StatusCode::BAD_GATEWAY,
			TunnelError::ConnectTimeout => http::StatusCode::GATEWAY_TIMEOUT,
			TunnelError::UpstreamRejected(_) => http::StatusCode::BAD_GATEWAY,
		}
	}
}
