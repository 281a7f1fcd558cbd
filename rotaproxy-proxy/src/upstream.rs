//! Upstream proxy values: parsing, normalization, and the line-acceptance
//! rule shared by the proxy-list file, the sources file, and downloaded
//! source bodies.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::UpstreamParseError;

/// `scheme://[user:pass@]host:port`. Equality and hashing are by the
/// normalized string.
#[derive(Debug, Clone, Eq)]
pub struct Upstream {
	scheme: String,
	credentials: Option<(String, String)>,
	host: String,
	port: u16,
	normalized: String,
}

impl PartialEq for Upstream {
	fn eq(&self, other: &Self) -> bool {
		self.normalized == other.normalized
	}
}

impl std::hash::Hash for Upstream {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.normalized.hash(state);
	}
}

impl std::fmt::Display for Upstream {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.normalized)
	}
}

fn upstream_regex() -> &'static Regex {
	static RE: OnceLock<Regex> = OnceLock::new();
	RE.get_or_init(|| {
		// Credentials are accepted whether or not a scheme is present,
		// unlike the original's format validator (which only accepted
		// them on the schemed form).
		Regex::new(
			r"(?x)
			^
			(?:(?P<scheme>https?)://)?
			(?:(?P<user>[\w.-]+):(?P<pass>[\w.-]+)@)?
			(?P<host>[\w.-]+)
			:
			(?P<port>\d+)
			$
			",
		)
		.expect("static regex is valid")
	})
}

impl Upstream {
	/// Parses a single upstream proxy string. Accepts `host:port` and
	/// `scheme://[user:pass@]host:port`, scheme defaulting to `http`.
	pub fn parse(s: &str) -> Result<Upstream, UpstreamParseError> {
		let s = s.trim();
		let caps = upstream_regex()
			.captures(s)
			.ok_or_else(|| UpstreamParseError::InvalidFormat(s.to_string()))?;
		let scheme = caps.name("scheme").map(|m| m.as_str()).unwrap_or("http");
		let host = caps["host"].to_string();
		let port: u16 = caps["port"]
			.parse()
			.map_err(|_| UpstreamParseError::InvalidPort(s.to_string()))?;
		let credentials = match (caps.name("user"), caps.name("pass")) {
			(Some(u), Some(p)) => Some((u.as_str().to_string(), p.as_str().to_string())),
			_ => None,
		};
		let normalized = normalize(scheme, &credentials, &host, port);
		Ok(Upstream {
			scheme: scheme.to_string(),
			credentials,
			host,
			port,
			normalized,
		})
	}

	/// The line-acceptance rule used when loading the proxy list file, the
	/// sources file, and downloaded source bodies: this is just whether
	/// the line parses as an `Upstream`.
	pub fn accepts_line(line: &str) -> bool {
		Self::parse(line).is_ok()
	}

	pub fn scheme(&self) -> &str {
		&self.scheme
	}

	pub fn host(&self) -> &str {
		&self.host
	}

	pub fn port(&self) -> u16 {
		self.port
	}

	pub fn credentials(&self) -> Option<(&str, &str)> {
		self.credentials
			.as_ref()
			.map(|(u, p)| (u.as_str(), p.as_str()))
	}

	pub fn authority(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}

	/// `scheme://[user:pass@]host:port`, suitable for reqwest::Proxy or
	/// for re-writing back to the proxy list file.
	pub fn as_str(&self) -> &str {
		&self.normalized
	}
}

fn normalize(scheme: &str, credentials: &Option<(String, String)>, host: &str, port: u16) -> String {
	match credentials {
		Some((u, p)) => format!("{scheme}://{u}:{p}@{host}:{port}"),
		None => format!("{scheme}://{host}:{port}"),
	}
}

/// Deduplicates a list of upstream strings, keeping first-seen order,
/// dropping lines that don't parse.
pub fn parse_and_dedup(lines: impl IntoIterator<Item = String>) -> Vec<Upstream> {
	let mut seen = std::collections::HashSet::new();
	let mut out = Vec::new();
	for line in lines {
		let line = line.trim();
		if line.is_empty() || line.starts_with('#') {
			continue;
		}
		if let Ok(up) = Upstream::parse(line) {
			if seen.insert(up.normalized.clone()) {
				out.push(up);
			}
		}
	}
	out
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn parses_bare_host_port() {
		let up = Upstream::parse("10.0.0.1:3128").unwrap();
		assert_eq!(up.scheme(), "http");
		assert_eq!(up.host(), "10.0.0.1");
		assert_eq!(up.port(), 3128);
		assert_eq!(up.as_str(), "http://10.0.0.1:3128");
	}

	#[test]
	fn parses_scheme_and_credentials() {
		let up = Upstream::parse("http://u:p@10.0.0.2:3128").unwrap();
		assert_eq!(up.credentials(), Some(("u", "p")));
		assert_eq!(up.as_str(), "http://u:p@10.0.0.2:3128");
	}

	#[test]
	fn accepts_credentials_without_scheme() {
		// Open Question resolution: the original rejects this form; we accept it.
		let up = Upstream::parse("u:p@10.0.0.3:3128").unwrap();
		assert_eq!(up.credentials(), Some(("u", "p")));
		assert_eq!(up.scheme(), "http");
	}

	#[test]
	fn rejects_garbage() {
		assert!(Upstream::parse("not a proxy").is_err());
		assert!(Upstream::parse("host-without-port").is_err());
		assert!(Upstream::parse("ftp://host:21").is_err());
	}

	#[test]
	fn dedup_preserves_first_seen_order() {
		let lines = vec![
			"# comment".to_string(),
			"".to_string(),
			"10.0.0.1:3128".to_string(),
			"http://10.0.0.1:3128".to_string(), // same normalized value
			"10.0.0.2:3128".to_string(),
			"garbage line".to_string(),
		];
		let ups = parse_and_dedup(lines);
		assert_eq!(ups.len(), 2);
		assert_eq!(ups[0].as_str(), "http://10.0.0.1:3128");
		assert_eq!(ups[1].as_str(), "http://10.0.0.2:3128");
	}
}
