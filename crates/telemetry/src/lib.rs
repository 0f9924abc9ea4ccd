use tracing_subscriber::{fmt, EnvFilter};

pub mod logging;
pub mod metrics;

pub use logging::{init_structured_logging, init_with_service, LogConfig, LogFormat};
pub use metrics::{encode_metrics, PIPELINE_METRICS};

/// Legacy init function for backwards compatibility
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
}
