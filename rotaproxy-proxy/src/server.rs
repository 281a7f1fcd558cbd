//! The listening endpoint: an HTTP/1.1 proxy that dispatches CONNECT to
//! the `TunnelEngine` and everything else to the `ForwardEngine`. Grounded
//! on the teacher's `gateway.rs` accept-loop idiom (`JoinSet` of
//! per-connection tasks, drain-aware accept `select!`).

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use rotaproxy_core::drain::DrainWatcher;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::forward::ForwardEngine;
use crate::tunnel::TunnelEngine;

pub struct ProxyServer {
	listen_addr: SocketAddr,
	forward: Arc<ForwardEngine>,
	tunnel: Arc<TunnelEngine>,
}

impl ProxyServer {
	pub fn new(listen_addr: SocketAddr, forward: Arc<ForwardEngine>, tunnel: Arc<TunnelEngine>) -> Self {
		ProxyServer {
			listen_addr,
			forward,
			tunnel,
		}
	}

	/// Binds the listener and serves connections until `watcher` signals a
	/// drain. New connections stop being accepted immediately; in-flight
	/// connections are left to finish on their own.
	pub async fn serve(&self, mut watcher: DrainWatcher) -> std::io::Result<()> {
		let listener = TcpListener::bind(self.listen_addr).await?;
		info!(addr = %self.listen_addr, "listening");

		let mut connections = JoinSet::new();
		loop {
			tokio::select! {
				accepted = listener.accept() => {
					let (stream, peer) = match accepted {
						Ok(pair) => pair,
						Err(e) => {
							warn!(error = %e, "accept failed");
							continue;
						},
					};
					let forward = self.forward.clone();
					let tunnel = self.tunnel.clone();
					connections.spawn(async move {
						if let Err(e) = serve_connection(stream, forward, tunnel).await {
							warn!(%peer, error = %e, "connection ended with error");
						}
					});
				}
				_ = watcher.signaled() => {
					info!("accept loop stopping");
					break;
				}
				Some(_) = connections.join_next(), if !connections.is_empty() => {}
			}
		}
		Ok(())
	}
}

async fn serve_connection(
	stream: tokio::net::TcpStream,
	forward: Arc<ForwardEngine>,
	tunnel: Arc<TunnelEngine>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
	let io = TokioIo::new(stream);
	let service = service_fn(move |req| {
		let forward = forward.clone();
		let tunnel = tunnel.clone();
		async move { handle(req, forward, tunnel).await }
	});
	hyper::server::conn::http1::Builder::new()
		.serve_connection(io, service)
		.with_upgrades()
		.await?;
	Ok(())
}

async fn handle(
	req: Request<Incoming>,
	forward: Arc<ForwardEngine>,
	tunnel: Arc<TunnelEngine>,
) -> Result<Response<Full<Bytes>>, Infallible> {
	if req.method() == http::Method::CONNECT {
		return Ok(handle_connect(req, tunnel).await);
	}

	let (parts, body) = req.into_parts();
	match forward.forward(parts.method, parts.uri, parts.headers, body).await {
		Ok(resp) => {
			let mut builder = Response::builder().status(resp.status);
			if let Some(headers) = builder.headers_mut() {
				*headers = resp.headers;
			}
			Ok(builder.body(Full::new(resp.body)).unwrap_or_else(|_| error_response(StatusCode::INTERNAL_SERVER_ERROR)))
		},
		Err(e) => {
			warn!(error = %e, "forward failed");
			Ok(error_response_with_body(e.status_code(), e.to_string()))
		},
	}
}

async fn handle_connect(req: Request<Incoming>, tunnel: Arc<TunnelEngine>) -> Response<Full<Bytes>> {
	let target = req.uri().to_string();
	match tunnel.connect_upstream(&target).await {
		Ok(upstream) => {
			tokio::spawn(async move {
				match hyper::upgrade::on(req).await {
					Ok(upgraded) => {
						crate::tunnel::TunnelEngine::relay(TokioIo::new(upgraded), upstream).await;
					},
					Err(e) => error!(error = %e, "CONNECT upgrade failed after upstream handshake"),
				}
			});
			// Reason phrase can't be customized via the `http` crate's
			// builder; clients key off the status code, not the phrase.
			Response::builder()
				.status(StatusCode::OK)
				.body(Full::new(Bytes::new()))
				.unwrap_or_else(|_| error_response(StatusCode::INTERNAL_SERVER_ERROR))
		},
		Err(e) => {
			warn!(error = %e, target, "CONNECT to upstream failed");
			error_response(e.status_code())
		},
	}
}

fn error_response(status: StatusCode) -> Response<Full<Bytes>> {
	Response::builder()
		.status(status)
		.body(Full::new(Bytes::new()))
		.expect("static error response builds")
}

/// Like `error_response`, but with a body — e.g. the literal
/// `"no upstream available"` text an empty pool sends downstream.
fn error_response_with_body(status: StatusCode, body: String) -> Response<Full<Bytes>> {
	Response::builder()
		.status(status)
		.body(Full::new(Bytes::from(body)))
		.unwrap_or_else(|_| error_response(status))
}
