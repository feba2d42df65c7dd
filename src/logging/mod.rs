// Logging
//
// - `tracing` for process logs (installed by `init_tracing`)
// - a JSONL cycle log with one line per workflow event

pub mod cycle_log;

pub use cycle_log::{CycleEvent, CycleLogger};

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "codecast=debug" } else { "codecast=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A second init (tests, embedding) is not an error worth reporting
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
