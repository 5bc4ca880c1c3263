//! Tracing setup and small logging helpers for binaries.

use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "simlab=info";

/// Install the global fmt subscriber. Safe to call more than once.
///
/// Honors `RUST_LOG`; falls back to `simlab=info`. Output goes to stderr so
/// command output on stdout stays machine-readable.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let installed = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok();
    if installed {
        tracing::info!(target = "simlab", "tracing initialized");
    }
}

pub fn log_info(msg: impl AsRef<str>) {
    tracing::info!(target = "simlab", "{}", msg.as_ref());
}

pub fn log_warn(msg: impl AsRef<str>) {
    tracing::warn!(target = "simlab", "{}", msg.as_ref());
}

/// Errors also go straight to stderr, in case no subscriber is installed.
pub fn log_error(msg: impl AsRef<str>) {
    let msg = msg.as_ref();
    tracing::error!(target = "simlab", "{}", msg);
    eprintln!("{msg}");
}
