//! Tracing setup for the binary. Filtering follows `RUST_LOG` with a
//! `bagpipe=info` default; all output goes to stderr so stdout stays clean
//! for artifact paths and `--json` reports.

use tracing_subscriber::EnvFilter;

/// `RUST_LOG_FORMAT=json` switches to line-delimited JSON events, for log
/// collectors running batches unattended.
fn json_output_requested() -> bool {
    std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bagpipe=info"))
}

/// Install the global subscriber. Calling this more than once is a no-op,
/// so tests and library consumers may call it freely.
pub fn init() {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(default_filter())
        .with_writer(std::io::stderr)
        .with_target(true);

    if json_output_requested() {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}
