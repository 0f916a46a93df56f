//! Logging and optional profiling setup
//!
//! The fmt layer is always installed and filtered by `RUST_LOG` when set, otherwise by the
//! verbosity flags. With the `profiling` feature, a chrome layer also records every span to a
//! `trace-*.json` file that can be opened with ui.perfetto.dev or chrome://tracing.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Keeps profiling output alive until the end of the run
///
/// Dropping it flushes the trace file when profiling is enabled.
pub struct LoggingGuard {
    #[cfg(feature = "profiling")]
    _chrome: tracing_chrome::FlushGuard,
}

/// Default filter when `RUST_LOG` is not set
pub fn default_directive(verbose: bool, debug: bool) -> &'static str {
    if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    }
}

/// Install the global subscriber
///
/// This MUST run before any logging so every layer sees the same events.
pub fn setup_logging_and_profiling(verbose: bool, debug: bool) -> LoggingGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose, debug)));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter);

    #[cfg(feature = "profiling")]
    {
        // The chrome layer must be added directly to the registry
        let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
            .include_args(true)
            .build();
        tracing_subscriber::registry()
            .with(chrome_layer)
            .with(fmt_layer)
            .init();
        tracing::info!("Profiling enabled, spans are recorded to a trace-*.json file");
        LoggingGuard { _chrome: guard }
    }

    #[cfg(not(feature = "profiling"))]
    {
        tracing_subscriber::registry().with(fmt_layer).init();
        LoggingGuard {}
    }
}

pub fn log_version_info() {
    tracing::info!(
        "{} {} ({})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        if cfg!(debug_assertions) {
            "debug build"
        } else {
            "release build"
        }
    );
}
