//! Diagnostic tracing for the gym and the eval harness.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. It is separate from
//! product output: check results go to stdout, and eval run artifacts are
//! written under `eval/results/` regardless of the log level.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing subscriber for development logging.
///
/// Reads `RUST_LOG` env var. Defaults to `warn` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=gym=debug cargo run -p gym -- check --dir . --expectations exp.json
/// ```
pub fn init() {
    // A second init (e.g. from tests) keeps the first subscriber.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
