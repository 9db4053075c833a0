//! Opt-in tracing initialization.
//!
//! The engine itself only emits `tracing` events; nothing is printed
//! unless the host installs a subscriber. [`init`] wires up a sensible
//! default: `.env` loading plus a fmt subscriber honoring `RUST_LOG`
//! (falling back to `info`).

use tracing_subscriber::EnvFilter;

/// Install the default subscriber. Safe to call more than once; later
/// calls are no-ops.
pub fn init() {
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
