//! CONNECT tunneling through the current upstream. Splits cleanly into
//! "dial and handshake the upstream" (`connect_upstream`, which the
//! caller can still turn into a clean error response) and "relay bytes"
//! (`relay`, run only after both sides are established).

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::debug;

use crate::error::TunnelError;
use crate::forward::basic_auth_value;
use crate::pool::UpstreamPool;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const RELAY_BUFFER: usize = 8 * 1024;

/// `AcceptedCONNECT → UpstreamConnecting → UpstreamTunnelEstablished →
/// Relaying → Closed`. Tracked only for observability; any failure
/// transitions straight to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
	AcceptedConnect,
	UpstreamConnecting,
	UpstreamTunnelEstablished,
	Relaying,
	Closed,
}

pub struct TunnelEngine {
	pool: Arc<UpstreamPool>,
}

impl TunnelEngine {
	pub fn new(pool: Arc<UpstreamPool>) -> Self {
		TunnelEngine { pool }
	}

	/// Dials the current upstream and performs the CONNECT handshake.
	/// Returns the established upstream socket, ready to relay.
	pub async fn connect_upstream(&self, target: &str) -> Result<TcpStream, TunnelError> {
		let (host, port) = target
			.rsplit_once(':')
			.ok_or_else(|| TunnelError::MalformedTarget(target.to_string()))?;
		if host.is_empty() || port.parse::<u16>().is_err() {
			return Err(TunnelError::MalformedTarget(target.to_string()));
		}

		let upstream = self.pool.current().ok_or(TunnelError::NoUpstream)?;

		let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(upstream.authority()))
			.await
			.map_err(|_| TunnelError::ConnectTimeout)??;

		let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
		if let Some((user, pass)) = upstream.credentials() {
			request.push_str(&format!(
				"Proxy-Authorization: Basic {}\r\n",
				basic_auth_value(user, pass)
			));
		}
		request.push_str("\r\n");
		stream.write_all(request.as_bytes()).await?;

		let status_line = read_response_headers(&mut stream).await?;
		if !status_line.split_whitespace().nth(1).is_some_and(|code| code == "200") {
			return Err(TunnelError::UpstreamRejected(status_line));
		}

		debug!(target, upstream = %upstream, "CONNECT tunnel established");
		Ok(stream)
	}

	/// Bidirectional byte relay between `downstream` and `upstream`.
	/// Returns once either side reaches EOF or errors, or once *neither*
	/// side has moved any bytes for the idle timeout — a single direction
	/// sitting quiet (e.g. a long one-way download) does not by itself
	/// end the tunnel.
	pub async fn relay<D>(downstream: D, upstream: TcpStream)
	where
		D: AsyncRead + AsyncWrite + Unpin,
	{
		let (mut d_read, mut d_write) = tokio::io::split(downstream);
		let (mut u_read, mut u_write) = upstream.into_split();

		let mut d_buf = vec![0u8; RELAY_BUFFER];
		let mut u_buf = vec![0u8; RELAY_BUFFER];
		let mut last_activity = Instant::now();

		loop {
			let idle = last_activity.elapsed();
			if idle >= IDLE_TIMEOUT {
				debug!("tunnel idle timeout, closing both sides");
				return;
			}

			tokio::select! {
				result = d_read.read(&mut d_buf) => {
					match result {
						Ok(0) | Err(_) => return,
						Ok(n) => {
							if u_write.write_all(&d_buf[..n]).await.is_err() {
								return;
							}
							last_activity = Instant::now();
						}
					}
				}
				result = u_read.read(&mut u_buf) => {
					match result {
						Ok(0) | Err(_) => return,
						Ok(n) => {
							if d_write.write_all(&u_buf[..n]).await.is_err() {
								return;
							}
							last_activity = Instant::now();
						}
					}
				}
				_ = tokio::time::sleep(IDLE_TIMEOUT - idle) => {}
			}
		}
	}
}

/// Reads from `stream` until the `\r\n\r\n` header terminator and returns
/// the status line.
async fn read_response_headers(stream: &mut TcpStream) -> Result<String, TunnelError> {
	let mut buf = Vec::with_capacity(256);
	let mut chunk = [0u8; 256];
	loop {
		if buf.windows(4).any(|w| w == b"\r\n\r\n") {
			break;
		}
		let n = tokio::time::timeout(CONNECT_TIMEOUT, stream.read(&mut chunk))
			.await
			.map_err(|_| TunnelError::ConnectTimeout)??;
		if n == 0 {
			return Err(TunnelError::UpstreamRejected("connection closed before response".to_string()));
		}
		buf.extend_from_slice(&chunk[..n]);
		if buf.len() > 16 * 1024 {
			return Err(TunnelError::UpstreamRejected("response headers too large".to_string()));
		}
	}
	let text = String::from_utf8_lossy(&buf);
	let status_line = text.lines().next().unwrap_or_default().to_string();
	Ok(status_line)
}

#[cfg(test)]
mod test {
	use tokio::net::TcpListener;

	use super::*;
	use crate::upstream::Upstream;

	async fn spawn_connect_proxy(accept_status: &'static str) -> String {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			let (mut sock, _) = listener.accept().await.unwrap();
			let mut buf = [0u8; 4096];
			let _ = sock.read(&mut buf).await;
			let _ = sock.write_all(format!("HTTP/1.1 {accept_status}\r\n\r\n").as_bytes()).await;
			if accept_status.starts_with("200") {
				// keep relaying whatever the client sends, echoed back once.
				let mut echo = [0u8; 64];
				if let Ok(n) = sock.read(&mut echo).await {
					let _ = sock.write_all(&echo[..n]).await;
				}
			}
		});
		format!("{addr}")
	}

	#[tokio::test]
	async fn connect_upstream_succeeds_on_200() {
		let proxy_addr = spawn_connect_proxy("200 Connection Established").await;
		let pool = Arc::new(UpstreamPool::new());
		pool.replace(vec![Upstream::parse(&proxy_addr).unwrap()]);
		let engine = TunnelEngine::new(pool);
		let stream = engine.connect_upstream("example.com:443").await;
		assert!(stream.is_ok());
	}

	#[tokio::test]
	async fn connect_upstream_rejects_non_200() {
		let proxy_addr = spawn_connect_proxy("403 Forbidden").await;
		let pool = Arc::new(UpstreamPool::new());
		pool.replace(vec![Upstream::parse(&proxy_addr).unwrap()]);
		let engine = TunnelEngine::new(pool);
		let err = engine.connect_upstream("example.com:443").await.unwrap_err();
		assert!(matches!(err, TunnelError::UpstreamRejected(_)));
	}

	#[tokio::test]
	async fn connect_upstream_rejects_malformed_target() {
		let pool = Arc::new(UpstreamPool::new());
		pool.replace(vec![Upstream::parse("10.0.0.1:1").unwrap()]);
		let engine = TunnelEngine::new(pool);
		let err = engine.connect_upstream("no-port-here").await.unwrap_err();
		assert!(matches!(err, TunnelError::MalformedTarget(_)));
	}

	#[tokio::test]
	async fn connect_upstream_fails_with_empty_pool() {
		let pool = Arc::new(UpstreamPool::new());
		let engine = TunnelEngine::new(pool);
		let err = engine.connect_upstream("example.com:443").await.unwrap_err();
		assert!(matches!(err, TunnelError::NoUpstream));
	}
}
