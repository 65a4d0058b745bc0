//! Process-wide `tracing` setup.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use thingworks_invocation::InvocationLogLayer;

/// Install a fmt subscriber filtered by `RUST_LOG`, or by `default_filter`
/// when that is unset, together with the invocation log capture layer.
///
/// Returns `false` if a global subscriber was already installed, in which
/// case nothing changes.
pub fn init_logging(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_thread_names(true))
        .with(InvocationLogLayer::new())
        .try_init()
        .is_ok()
}
