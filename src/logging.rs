//! Tracing initialization.
//!
//! Logs go to stderr so command output on stdout stays parseable.

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Install the global subscriber.
///
/// Reads the `SYNTH_LOG` environment variable, e.g.
/// `SYNTH_LOG=connection_synthesis=debug,sqlx=warn`. Falls back to
/// `connection_synthesis=info` when unset or invalid. Safe to call more than
/// once.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("SYNTH_LOG")
            .unwrap_or_else(|_| EnvFilter::new("connection_synthesis=info"));

        let _ = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .with(filter)
            .try_init();
    });
}
