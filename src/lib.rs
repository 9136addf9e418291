pub mod clients;
pub mod config;
pub mod deserializers;
pub mod error;
pub mod http;
pub mod polling;
pub mod report;
pub mod review;
pub mod schemas;
pub mod sessions;
pub mod upload;
pub mod workflow;

pub use error::{GatewayError, Result};

/// Default `tracing` filter when neither `RUST_LOG` nor a configured level is set.
pub const DEFAULT_LOG_FILTER: &str = "aiko_gateway=info,tower_http=info";

/// Expand a configured level (`debug`) or directive (`a=debug,b=info`).
pub fn log_directive(configured: &str) -> String {
    let configured = configured.trim();
    if configured.is_empty() {
        DEFAULT_LOG_FILTER.to_string()
    } else if configured.contains('=') {
        configured.to_string()
    } else {
        format!("aiko_gateway={},tower_http=info", configured)
    }
}

/// Build the log filter: `RUST_LOG` wins, then the configured level, then the default.
pub fn log_filter(configured: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_directive(configured)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_level_expands_to_a_directive() {
        assert_eq!(log_directive("debug"), "aiko_gateway=debug,tower_http=info");
        assert_eq!(log_directive("hyper=warn"), "hyper=warn");
        assert_eq!(log_directive(" "), DEFAULT_LOG_FILTER);
    }
}
