//! Tracing setup for the CLI: env-filtered, `trace_id`/`span_id`-tagged text to stderr so
//! stdout stays clean for `--json` output piped elsewhere.

use crate::log_format::TextWithSpanIds;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

/// Initializes the global subscriber from `RUST_LOG` (default: `warn`). Safe to call once;
/// a second call is a no-op.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .event_format(TextWithSpanIds::new())
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .try_init();
    Ok(())
}
