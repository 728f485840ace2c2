//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Installs a JSON `tracing` subscriber filtered by `RUST_LOG`, falling back
/// to `default_level` when it is unset or invalid.
///
/// Returns `false` if a global subscriber was already installed; the existing
/// one is left in place.
pub fn init_tracing(default_level: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_keeps_existing_subscriber() {
        init_tracing("info");

        assert!(!init_tracing("debug"));
    }
}
