//! Logging setup for the command-line tool

use tracing_subscriber::prelude::*;

/// Install the global `tracing` subscriber
///
/// If `RUST_LOG` is not set a default is chosen: `debug` in debug builds and `info`
/// in release builds, with HTTP internals kept quiet in both.
pub fn setup_logging() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt;

    let defaulted = std::env::var("RUST_LOG").is_err();
    if defaulted {
        // Safety: single-threaded at startup
        unsafe {
            if cfg!(debug_assertions) {
                std::env::set_var("RUST_LOG", "debug,reqwest=info,hyper=info");
            } else {
                std::env::set_var("RUST_LOG", "info,reqwest=warn,hyper=warn");
            }
        }
    }

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(fmt_layer).init();

    if defaulted {
        tracing::debug!(
            "RUST_LOG set to default: {}",
            std::env::var("RUST_LOG").unwrap_or_default()
        );
    }
    #[cfg(feature = "profiling")]
    tracing::info!("Built with profiling scopes enabled");
}
