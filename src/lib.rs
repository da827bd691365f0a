//! A caching, optionally TLS-intercepting forward HTTP proxy.
//!
//! The core is organized leaf-first, mirroring the module map this crate
//! was grown from: [`http`] (wire codec) and [`entry`] (one cache record)
//! sit at the bottom; [`cache`] builds on both; [`query`] and [`client`]
//! model the two sides of a transaction; [`recolor`] and [`filter`] are
//! narrow policy helpers; [`proxy`] is the connection manager that wires
//! everything together behind a `tokio` accept loop.

pub mod cache;
pub mod client;
pub mod config;
pub mod entry;
pub mod error;
pub mod filter;
pub mod http;
pub mod memory;
pub mod proxy;
pub mod query;
pub mod recolor;
pub mod tls;

/// Default number of entries the cache holds before eviction kicks in.
pub const CACHE_SIZE: usize = 10_000;

/// Default per-client inactivity timeout, in seconds.
pub const CONNECTION_TIMEOUT_SECS: u64 = 300;

/// Default ceiling on concurrent client connections.
pub const MAX_CONNECTIONS: usize = 1_000;

/// The sentinel request method that instructs the proxy to shut down
/// gracefully once in-flight transactions drain.
pub const HALT_METHOD: &str = "__halt__";

pub use config::ProxyConfig;
pub use error::{ProxyError, ProxyResult};
