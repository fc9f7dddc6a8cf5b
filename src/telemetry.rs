//! Tracing initialization.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging with an env-driven filter.
///
/// Safe to call more than once; later calls are no-ops so tests can
/// initialize freely.
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "zone_trader=info,engine_core=info,risk_engine=info,trade_ledger=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
