//! Logging setup.
//!
//! The provider logs through `tracing`. Output goes to **stderr**: the host
//! process owns stdout. Filtering follows `RUST_LOG`.
//!
//! ```bash
//! # Every management API request
//! RUST_LOG=apigee_provider=debug terraform apply
//!
//! # Deploys, undeploys and prune warnings only
//! RUST_LOG=apigee_provider::deployment=info terraform apply
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// `RUST_LOG` if set and parseable, otherwise `default_level`.
fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn subscriber(default_level: &str) -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::registry().with(filter(default_level)).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    )
}

/// Install the global subscriber at `info` unless `RUST_LOG` says otherwise.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Like [`init_logging`], with a different fallback level.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    subscriber(default_level).init();
}

/// Install the global subscriber unless one is already set.
///
/// Returns `false` if another subscriber got there first, which is the
/// normal case when several tests in one process each ask for logging.
pub fn try_init_logging() -> bool {
    subscriber("info").try_init().is_ok()
}
