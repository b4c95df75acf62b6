use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;

/// Default filter directive for the given config, used when `RUST_LOG` is unset.
pub fn default_directive(config: &Config) -> &'static str {
    if config.debug_logging {
        "pipsync=debug,pipsync_runtime=debug,pipsync_http=debug,pipsync_dom=debug,info"
    } else {
        "info"
    }
}

/// Install the global subscriber. Safe to call more than once; later calls
/// leave the first subscriber in place.
pub fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(config.debug_mode))
        .try_init();
}

/// Span wrapping one lifecycle call of one domain module. Every event logged
/// inside carries the module name and stage as fields.
pub fn domain_span(module: &str, stage: &str) -> tracing::Span {
    tracing::info_span!("domain", module = %module, stage = %stage)
}
