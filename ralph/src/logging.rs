//! Diagnostic tracing for the loop controller.
//!
//! Tracing output goes to stderr and is filtered by `RUST_LOG`. It is separate
//! from the operator-facing progress lines printed by the CLI and from the
//! agent's own output, which is streamed through unchanged.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn` if unset.
///
/// # Example
/// ```bash
/// RUST_LOG=ralph=debug ralph run --max 3
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
