//! Plain-HTTP forwarding through the current upstream. A fresh
//! `reqwest::Client` is built per request because reqwest ties proxy
//! configuration to client construction rather than to a per-request
//! option.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use http_body_util::BodyExt;
use hyper::body::Incoming;

use crate::error::ForwardError;
use crate::pool::UpstreamPool;

const FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ForwardedResponse {
	pub status: StatusCode,
	pub headers: HeaderMap,
	pub body: Bytes,
}

pub struct ForwardEngine {
	pool: Arc<UpstreamPool>,
}

impl ForwardEngine {
	pub fn new(pool: Arc<UpstreamPool>) -> Self {
		ForwardEngine { pool }
	}

	/// Forwards one absolute-URI request through the pool's current
	/// upstream.
	pub async fn forward(
		&self,
		method: Method,
		uri: Uri,
		headers: HeaderMap,
		body: Incoming,
	) -> Result<ForwardedResponse, ForwardError> {
		let upstream = self.pool.current().ok_or(ForwardError::NoUpstream)?;

		if uri.scheme().is_none() || uri.authority().is_none() {
			return Err(ForwardError::Malformed("request-URI must be absolute-form".to_string()));
		}

		let collected = body
			.collect()
			.await
			.map_err(|e| ForwardError::Malformed(format!("reading request body: {e}")))?;
		let body_bytes = collected.to_bytes();

		let mut proxy = reqwest::Proxy::http(upstream.as_str()).map_err(ForwardError::Transport)?;
		if let Some((user, pass)) = upstream.credentials() {
			proxy = proxy.basic_auth(user, pass);
		}
		let client = reqwest::Client::builder()
			.proxy(proxy)
			.timeout(FORWARD_TIMEOUT)
			.build()
			.map_err(ForwardError::Transport)?;

		let method = reqwest::Method::from_bytes(method.as_str().as_bytes())
			.map_err(|_| ForwardError::Malformed(format!("unsupported method {method}")))?;
		let mut req = client.request(method, uri.to_string());
		for (name, value) in strip_hop_by_hop(&headers) {
			req = req.header(name, value);
		}
		if !body_bytes.is_empty() {
			req = req.body(body_bytes);
		}

		let resp = req.send().await.map_err(|e| {
			if e.is_timeout() {
				ForwardError::Timeout
			} else {
				ForwardError::Transport(e)
			}
		})?;

		let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
		let mut out_headers = HeaderMap::new();
		for (name, value) in resp.headers() {
			if let (Ok(name), Ok(value)) = (
				HeaderName::from_bytes(name.as_str().as_bytes()),
				HeaderValue::from_bytes(value.as_bytes()),
			) {
				out_headers.append(name, value);
			}
		}
		let out_headers = strip_hop_by_hop_map(out_headers);

		let body = resp.bytes().await.map_err(|e| {
			if e.is_timeout() {
				ForwardError::Timeout
			} else {
				ForwardError::Transport(e)
			}
		})?;

		Ok(ForwardedResponse {
			status,
			headers: out_headers,
			body,
		})
	}
}

const HOP_BY_HOP: [&str; 3] = ["connection", "keep-alive", "proxy-connection"];

/// Drops hop-by-hop headers and anything named in `Connection`, stripped
/// in both directions.
fn strip_hop_by_hop(headers: &HeaderMap) -> Vec<(String, String)> {
	let named: Vec<String> = headers
		.get_all(http::header::CONNECTION)
		.iter()
		.filter_map(|v| v.to_str().ok())
		.flat_map(|v| v.split(',').map(|s| s.trim().to_ascii_lowercase()))
		.collect();

	headers
		.iter()
		.filter(|(name, _)| {
			let lower = name.as_str().to_ascii_lowercase();
			!HOP_BY_HOP.contains(&lower.as_str()) && !named.contains(&lower)
		})
		.filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
		.collect()
}

fn strip_hop_by_hop_map(headers: HeaderMap) -> HeaderMap {
	let named: Vec<String> = headers
		.get_all(http::header::CONNECTION)
		.iter()
		.filter_map(|v| v.to_str().ok())
		.flat_map(|v| v.split(',').map(|s| s.trim().to_ascii_lowercase()))
		.collect();

	let mut out = HeaderMap::new();
	for (name, value) in headers.iter() {
		let lower = name.as_str().to_ascii_lowercase();
		if HOP_BY_HOP.contains(&lower.as_str()) || named.contains(&lower) {
			continue;
		}
		out.append(name.clone(), value.clone());
	}
	out
}

/// base64-encodes `user:pass` for a `Proxy-Authorization: Basic` header.
/// Exposed for the tunnel engine to reuse the same encoding.
pub fn basic_auth_value(user: &str, pass: &str) -> String {
	base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"))
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn strip_hop_by_hop_drops_standard_and_named_headers() {
		let mut headers = HeaderMap::new();
		headers.insert(http::header::CONNECTION, HeaderValue::from_static("close, X-Custom"));
		headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
		headers.insert("x-custom", HeaderValue::from_static("drop-me"));
		headers.insert("x-keep", HeaderValue::from_static("keep-me"));

		let out = strip_hop_by_hop(&headers);
		let names: Vec<&str> = out.iter().map(|(n, _)| n.as_str()).collect();
		assert!(!names.contains(&"connection"));
		assert!(!names.contains(&"keep-alive"));
		assert!(!names.contains(&"x-custom"));
		assert!(names.contains(&"x-keep"));
	}

	#[test]
	fn basic_auth_value_matches_known_vector() {
		assert_eq!(basic_auth_value("Aladdin", "open sesame"), "QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
	}

	#[test]
	fn basic_auth_value_matches_single_character_credentials() {
		assert_eq!(basic_auth_value("u", "p"), "dTpw");
	}
}
