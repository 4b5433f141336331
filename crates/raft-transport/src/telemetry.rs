//! # telemetry
//!
//! why: embedding applications and tests need one call to see what the raft group is doing
//! relations: configures the subscriber for the tracing events emitted across all raft crates
//! what: init_tracing

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// install a fmt subscriber filtered by `RUST_LOG`, falling back to `default_filter`
///
/// safe to call more than once; only the first call installs anything
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init_tracing("debug");
        init_tracing("raft_core=trace");
        tracing::info!("tracing initialised twice");
    }
}
