//! Diagnostic logging.
//!
//! Compact timestamped output on stderr. `RUST_LOG` takes precedence over the configured level:
//! ```bash
//! RUST_LOG=keytrail::watcher=trace keytrail
//! ```

use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

const TIME_FORMAT: &str = "%H:%M:%S%.3f";

/// The filter in effect: `RUST_LOG` if set and valid, the configured level otherwise.
fn filter(config: &Config) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
}

/// Install the global subscriber. Later calls leave the first subscriber in place.
pub fn init(config: &Config) {
    let installed = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_env_filter(filter(config))
        .try_init();

    if installed.is_err() {
        tracing::debug!("logging already initialised");
    }
}
