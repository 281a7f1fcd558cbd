//! Logging initialization. Mirrors the simple `tracing_subscriber::fmt`
//! setup used by the binary entrypoints in the corpus this crate is
//! descended from: an `EnvFilter` sourced from `RUST_LOG` (defaulting to
//! `info`), writing to stderr so stdout stays free for any piped output.

use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber. Safe to call at most once;
/// subsequent calls are no-ops (the underlying `try_init` swallows the
/// "already set" error).
pub fn init() {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let _ = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.try_init();
}
