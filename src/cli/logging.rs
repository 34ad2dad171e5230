//! Logging initialization

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "IAC_GRAPH_LOG";

/// Filter directive for a `-v` count.
#[must_use]
pub fn verbosity_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// `IAC_GRAPH_LOG` first, then the configured level, then the `-v` count.
fn filter(verbose: u8, configured: Option<&str>) -> EnvFilter {
    if let Ok(f) = EnvFilter::try_from_env(LOG_ENV) {
        return f;
    }
    configured
        .and_then(|level| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new(verbosity_directive(verbose)))
}

/// Install the stderr subscriber. Later calls in the same process are no-ops.
pub fn init_logging(verbose: u8, configured: Option<&str>) {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter(verbose, configured))
        .with_target(false)
        .try_init();
}
