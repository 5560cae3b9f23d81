use clap::Parser;
use env_logger::Env;

use service_metrics::config::Config;

/// Entry point for the service metrics exporter.
///
/// Logging is configured through `RUST_LOG` and defaults to `info`, or `debug` in devel mode.
///
/// # Examples
///
/// ```bash
/// service-metrics --listen 0.0.0.0:9101
/// service-metrics --devel
/// ```
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();

    let level = if config.devel { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    service_metrics::run(config).await
}
