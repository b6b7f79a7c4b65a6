//! Process-wide logging setup (§11).
//!
//! A much smaller relative of `rust-srec/src/logging`: no reload handle, no
//! broadcast-to-websocket channel — there is no web surface in this binary's
//! scope — just an `EnvFilter` over `fmt::layer()`, initialised once at
//! startup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default log filter directive, applied when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "archiver=info";

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}
