//! Tracing bootstrap for hosts that have no subscriber of their own

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a fmt subscriber filtered at `level`; `RUST_LOG` wins when set.
///
/// Returns false when a global subscriber was already installed.
pub fn init_tracing(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},gwa_sync={},gwa_cache={}", level, level, level))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}
