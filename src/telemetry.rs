//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// Initialize tracing for the process. The filter comes from `RUST_LOG`,
/// falling back to `info` (`debug` when verbose).
///
/// Logs go to stderr so command output on stdout stays parseable.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}
