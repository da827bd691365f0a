//! CLI configuration: a `clap`-parsed config struct fronting the proxy's
//! tunables, following the same config-struct convention as
//! `zonblade-mini-gateway-rs`'s router CLI and `npolshakova-agentgateway`.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::{CACHE_SIZE, CONNECTION_TIMEOUT_SECS, MAX_CONNECTIONS};

/// `proxy <port>` — a caching, optionally TLS-intercepting forward HTTP proxy.
#[derive(Debug, Clone, Parser)]
#[command(name = "proxy", version, about)]
pub struct ProxyConfig {
    /// TCP port to listen on (1..65535).
    #[arg(value_parser = parse_port)]
    pub port: u16,

    /// Enable TLS-terminating interception of CONNECT tunnels.
    #[arg(long)]
    pub intercept: bool,

    /// Path to the root CA certificate (PEM), used to verify per-hostname
    /// leaf certs minted for interception. Required when `--intercept` is set.
    #[arg(long)]
    pub ca_cert: Option<PathBuf>,

    /// Path to the root CA private key (PEM). Required when `--intercept` is set.
    #[arg(long)]
    pub ca_key: Option<PathBuf>,

    /// External helper invoked as `<helper> <hostname>` to mint/refresh a
    /// leaf certificate for the intercepted host. Not invoked unless
    /// `--intercept` is set.
    #[arg(long)]
    pub cert_helper: Option<PathBuf>,

    /// Directory the cert helper writes `<hostname>.crt` / `<hostname>.key`
    /// pairs into.
    #[arg(long)]
    pub cert_dir: Option<PathBuf>,

    /// Optional newline-delimited file of host substrings to reject with 403.
    #[arg(long)]
    pub filter_list: Option<PathBuf>,

    /// Per-client inactivity timeout, in seconds.
    #[arg(long, default_value_t = CONNECTION_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Maximum number of cache entries.
    #[arg(long, default_value_t = CACHE_SIZE)]
    pub cache_size: usize,

    /// Maximum number of concurrent client connections.
    #[arg(long, default_value_t = MAX_CONNECTIONS)]
    pub max_connections: usize,
}

impl ProxyConfig {
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

fn parse_port(s: &str) -> Result<u16, String> {
    let port: u32 = s.parse().map_err(|_| format!("not a number: {s}"))?;
    if port == 0 || port > u16::MAX as u32 {
        return Err(format!("port must be in 1..65535, got {port}"));
    }
    Ok(port as u16)
}
