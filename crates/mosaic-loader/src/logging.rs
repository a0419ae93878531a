//! Tracing subscriber setup for binaries and tests embedding the loader.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a global fmt subscriber filtered by `RUST_LOG` (or `default_level`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing(default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true);

    // Another subscriber may already be installed (e.g. by a test harness).
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing("debug", false);
        init_tracing("info", true);
        tracing::info!("still logging");
    }
}
