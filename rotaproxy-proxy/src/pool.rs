//! The in-memory upstream pool: an ordered list plus the currently
//! selected upstream, kept consistent under a single mutex. Readers copy
//! out an `Arc<Upstream>` and release the lock before doing any I/O.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rand::seq::IndexedRandom;
use tracing::{info, warn};

use crate::error::PoolError;
use crate::upstream::{Upstream, parse_and_dedup};

struct PoolState {
	list: Vec<Arc<Upstream>>,
	current: Option<Arc<Upstream>>,
}

pub struct UpstreamPool {
	state: Mutex<PoolState>,
}

impl Default for UpstreamPool {
	fn default() -> Self {
		Self::new()
	}
}

impl UpstreamPool {
	pub fn new() -> Self {
		UpstreamPool {
			state: Mutex::new(PoolState {
				list: Vec::new(),
				current: None,
			}),
		}
	}

	/// Reads `path`, dedups, and atomically installs the result as the
	/// new list. A missing file creates a commented example file and
	/// returns `Ok(0)` rather than failing.
	pub fn load_from_file(&self, path: &Path) -> Result<usize, PoolError> {
		let contents = match std::fs::read_to_string(path) {
			Ok(c) => c,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				warn!(path = %path.display(), "proxy list file not found, creating example");
				write_example_file(path)?;
				return Ok(0);
			},
			Err(e) => return Err(PoolError::Io(e)),
		};
		let list = parse_and_dedup(contents.lines().map(str::to_string));
		let count = list.len();
		self.replace(list);
		Ok(count)
	}

	/// Atomically installs a deduplicated list. Preserves `current` if
	/// it's still present; otherwise reseeds randomly.
	pub fn replace(&self, list: Vec<Upstream>) {
		let list: Vec<Arc<Upstream>> = list.into_iter().map(Arc::new).collect();
		let mut state = self.state.lock().expect("pool mutex poisoned");
		let keep_current = state
			.current
			.as_ref()
			.and_then(|cur| list.iter().find(|u| u.as_ref() == cur.as_ref()).cloned());
		state.current = keep_current.or_else(|| list.choose(&mut rand::rng()).cloned());
		state.list = list;
	}

	/// Picks a new `current` uniformly at random from the list. No-op on
	/// an empty list.
	pub fn reseed_current(&self) {
		let mut state = self.state.lock().expect("pool mutex poisoned");
		let next = state.list.choose(&mut rand::rng()).cloned();
		if let Some(next) = next {
			if state.current.as_ref() != Some(&next) {
				info!(upstream = %next, "rotated to new upstream");
			}
			state.current = Some(next);
		}
	}

	/// Snapshot read of the current upstream.
	pub fn current(&self) -> Option<Arc<Upstream>> {
		self.state.lock().expect("pool mutex poisoned").current.clone()
	}

	pub fn len(&self) -> usize {
		self.state.lock().expect("pool mutex poisoned").list.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

fn write_example_file(path: &Path) -> Result<(), PoolError> {
	let example = "\
# Format: host:port or http://host:port
# This file is reloaded automatically on each refresh cycle.
# You can edit it while the process is running.

# Example public proxies (may not work):
# 8.8.8.8:8080
# 1.1.1.1:3128
# http://proxy.example.com:8080

# Add your proxies below (one per line)
";
	if let Some(parent) = path.parent() {
		if !parent.as_os_str().is_empty() {
			std::fs::create_dir_all(parent)?;
		}
	}
	std::fs::write(path, example)?;
	Ok(())
}

/// Writes the refreshed list back to `path` with a header comment and
/// timestamp. `timestamp` is passed in rather than read from the clock
/// here, so the pool stays free of wall-clock reads.
pub fn write_refreshed_file(
	path: &Path,
	upstreams: &[Upstream],
	timestamp: &str,
	validated: bool,
) -> Result<(), PoolError> {
	let mut out = String::new();
	if validated {
		out.push_str(&format!("# Validated proxy list refreshed at {timestamp}\n"));
	} else {
		out.push_str(&format!("# Proxy list refreshed at {timestamp}\n"));
	}
	out.push_str(&format!("# Total: {}\n\n", upstreams.len()));
	for up in upstreams {
		out.push_str(up.as_str());
		out.push('\n');
	}
	std::fs::write(path, out)?;
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;

	fn up(s: &str) -> Upstream {
		Upstream::parse(s).unwrap()
	}

	#[test]
	fn current_is_always_a_member_of_some_installed_list() {
		let pool = UpstreamPool::new();
		pool.replace(vec![up("10.0.0.1:1"), up("10.0.0.2:2")]);
		let first_list = [up("10.0.0.1:1"), up("10.0.0.2:2")];
		for _ in 0..50 {
			let cur = pool.current().unwrap();
			assert!(first_list.iter().any(|u| u == cur.as_ref()));
			pool.reseed_current();
		}
	}

	#[test]
	fn replace_preserves_current_when_still_present() {
		let pool = UpstreamPool::new();
		pool.replace(vec![up("10.0.0.1:1")]);
		let before = pool.current().unwrap();
		pool.replace(vec![up("10.0.0.1:1"), up("10.0.0.2:2")]);
		let after = pool.current().unwrap();
		assert_eq!(before, after);
	}

	#[test]
	fn replace_reseeds_when_current_dropped() {
		let pool = UpstreamPool::new();
		pool.replace(vec![up("10.0.0.1:1")]);
		pool.replace(vec![up("10.0.0.2:2"), up("10.0.0.3:3")]);
		let after = pool.current().unwrap();
		assert!(after.as_ref() == &up("10.0.0.2:2") || after.as_ref() == &up("10.0.0.3:3"));
	}

	#[test]
	fn replace_with_empty_list_clears_current() {
		let pool = UpstreamPool::new();
		pool.replace(vec![up("10.0.0.1:1")]);
		pool.replace(vec![]);
		assert!(pool.current().is_none());
	}

	#[test]
	fn reseed_on_empty_pool_is_noop() {
		let pool = UpstreamPool::new();
		pool.reseed_current();
		assert!(pool.current().is_none());
	}

	#[test]
	fn load_missing_file_creates_example_and_returns_zero() {
		let dir = std::env::temp_dir().join(format!("rotaproxy-test-{}", std::process::id()));
		let path = dir.join("proxy_list.txt");
		let _ = std::fs::remove_file(&path);
		let pool = UpstreamPool::new();
		let count = pool.load_from_file(&path).unwrap();
		assert_eq!(count, 0);
		assert!(path.exists());
		std::fs::remove_dir_all(&dir).ok();
	}
}
