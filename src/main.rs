use clap::Parser;
use tracing::{error, info};

use rustysquid::{ProxyConfig, CACHE_SIZE, CONNECTION_TIMEOUT_SECS, MAX_CONNECTIONS};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config = ProxyConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rustysquid=info")),
        )
        .init();

    if config.intercept {
        rustls::crypto::aws_lc_rs::default_provider()
            .install_default()
            .expect("a crypto provider must not already be installed");
    }

    info!("rustysquid - caching forward HTTP proxy");
    info!(port = config.port, "listening");
    info!(cache_size = config.cache_size, default = CACHE_SIZE, "cache configured");
    info!(max_connections = config.max_connections, default = MAX_CONNECTIONS, "connection limit configured");
    info!(timeout_secs = config.timeout, default = CONNECTION_TIMEOUT_SECS, "inactivity timeout configured");
    if config.intercept {
        info!("TLS interception enabled");
    }

    match rustysquid::proxy::run(config).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!(error = %e, "proxy failed");
            std::process::exit(1);
        }
    }
}
