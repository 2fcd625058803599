//! Tracing subscriber initialization for cellgraph binaries.
//!
//! Libraries only emit `tracing` events; binaries pick a subscriber at startup:
//! - `init_dev_subscriber()` - stderr logging at DEBUG
//! - `init_dev_subscriber_with_env_filter()` - stderr logging filtered by `RUST_LOG`
//!
//! # Usage
//! ```no_run
//! use cellgraph_core::telemetry;
//!
//! fn main() {
//!     telemetry::init_dev_subscriber_with_env_filter();
//!     tracing::info!("Application started");
//! }
//! ```

use tracing::subscriber::SetGlobalDefaultError;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Initialize a stderr subscriber showing DEBUG and above.
///
/// Call this at application startup (not in the library). A second call is
/// ignored with a warning on stderr.
pub fn init_dev_subscriber() {
    let subscriber = fmt::Subscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    report(tracing::subscriber::set_global_default(subscriber));
}

/// Like `init_dev_subscriber`, but filtered by `RUST_LOG`.
///
/// `RUST_LOG=cellgraph_db=debug,info` shows debug events from the graph store
/// and info from everything else. Falls back to [`DEFAULT_FILTER`].
pub fn init_dev_subscriber_with_env_filter() {
    report(try_init_with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    ));
}

/// Install a stderr subscriber with an explicit filter.
pub fn try_init_with_filter(filter: EnvFilter) -> Result<(), SetGlobalDefaultError> {
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}

fn report(result: Result<(), SetGlobalDefaultError>) {
    if let Err(e) = result {
        eprintln!("tracing subscriber not installed: {}", e);
    }
}
