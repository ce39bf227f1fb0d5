//! Subscriber setup for binaries, benches and tests.
//!
//! The library itself only emits `tracing` events and never installs a
//! global subscriber.

use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (for example `"lenslink=debug"`).
///
/// Returns `false` when a global subscriber was already set.
pub fn init_from_env(default_directive: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_existing_subscriber() {
        let _ = init_from_env("lenslink=debug");
        assert!(!init_from_env("lenslink=trace"));
    }
}
