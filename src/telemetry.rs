//! Tracing initialization.
//!
//! Controlled by `SNOW_LOG` (an `EnvFilter` directive string):
//! - unset → warnings and errors only
//! - e.g. `SNOW_LOG=snow=debug` → module-scoped debug output
//!
//! Set `SNOW_LOG_JSON=1` for line-JSON events on stderr (useful when snow
//! runs under a supervisor that collects logs).

use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "SNOW_LOG";

/// Environment variable switching to JSON output.
pub const LOG_JSON_ENV: &str = "SNOW_LOG_JSON";

/// Initialize the global tracing subscriber. Call once from `main`.
///
/// Repeated initialization (tests) is tolerated silently.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));

    let json = std::env::var(LOG_JSON_ENV).is_ok_and(|v| v == "1");
    let result = if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
    };
    // A second init (embedder already set one up) is fine.
    drop(result);
}
