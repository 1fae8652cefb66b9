//! Logging
//!
//! tracing subscriber set-up. Logs go to stderr so streamed replies on
//! stdout stay clean.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "ORCHAT_LOG";

/// Filter used when neither `ORCHAT_LOG` nor `RUST_LOG` is set
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "orchat=debug"
    } else {
        "orchat=warn"
    }
}

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)))
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(verbose: bool) {
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = tracing_subscriber::registry()
        .with(env_filter(verbose))
        .with(layer)
        .try_init();
}
