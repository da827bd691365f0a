//! The connection manager: accepts clients, drives each one through its
//! request/response or tunnel lifecycle, and keeps the cache's TTL flags
//! current.
//!
//! Grounded on `examples/original_source/proxy/src/proxy.c`'s dispatch
//! loop (`Proxy_run`/`Proxy_handleClient`/`Proxy_handleQuery`) for the
//! per-state behavior, built around an async-task-per-connection shape: a
//! `current_thread` runtime, a `tokio::select!` over the listener and
//! shutdown signals, and an atomic connection counter gating admission.
//! This task-per-connection design is an equivalent of the original's
//! single-threaded readiness multiplex — at most one handler's code runs
//! at a time on the current-thread executor — and the cache is guarded by
//! a single mutex in case that ever changes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::cache::Cache;
use crate::client::{Client, ClientState};
use crate::config::ProxyConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::filter::HostFilter;
use crate::http::{self, Method};
use crate::query::{self, Query};
use crate::recolor;
use crate::tls::{self, InterceptConfig};

const MAX_HEADER_BYTES: usize = 32 * 1024;
const CACHE_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

struct Proxy {
    cache: Mutex<Cache>,
    filter: HostFilter,
    intercept: Option<InterceptConfig>,
    connector: Option<tokio_rustls::TlsConnector>,
    timeout: Duration,
    max_connections: usize,
    active_connections: AtomicUsize,
    halt: Notify,
}

/// Runs the proxy to completion: binds `config.port`, accepts connections
/// until a `__halt__` sentinel or SIGTERM/SIGINT arrives, then drains
/// in-flight connections before returning.
pub async fn run(config: ProxyConfig) -> ProxyResult<()> {
    let filter = match &config.filter_list {
        Some(path) => HostFilter::load(path)?,
        None => HostFilter::empty(),
    };

    let intercept = match (&config.cert_helper, &config.cert_dir) {
        (Some(helper), Some(dir)) if config.intercept => {
            Some(InterceptConfig { cert_helper: helper.clone(), cert_dir: dir.clone() })
        }
        _ if config.intercept => {
            return Err(ProxyError::TlsError("--intercept requires --cert-helper and --cert-dir".into()))
        }
        _ => None,
    };
    let connector = if intercept.is_some() { Some(tls::build_connector()?) } else { None };

    let proxy = Arc::new(Proxy {
        cache: Mutex::new(Cache::new(config.cache_size)),
        filter,
        intercept,
        connector,
        timeout: config.inactivity_timeout(),
        max_connections: config.max_connections,
        active_connections: AtomicUsize::new(0),
        halt: Notify::new(),
    });

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "proxy listening");

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    let mut refresh = tokio::time::interval(CACHE_REFRESH_INTERVAL);

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                break;
            }
            _ = proxy.halt.notified() => {
                info!("received halt sentinel, shutting down");
                break;
            }
            _ = refresh.tick() => {
                let removed = proxy.cache.lock().await.refresh();
                if removed > 0 {
                    debug!(removed, "cache refresh evicted stale entries");
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => accept_connection(&proxy, stream, addr),
                    Err(e) => error!(error = %e, "accept failed"),
                }
            }
        }
    }

    info!(active = proxy.active_connections.load(Ordering::Relaxed), "draining active connections");
    while proxy.active_connections.load(Ordering::Relaxed) > 0 {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    info!("shutdown complete");
    Ok(())
}

fn accept_connection(proxy: &Arc<Proxy>, stream: TcpStream, addr: std::net::SocketAddr) {
    let current = proxy.active_connections.load(Ordering::Relaxed);
    if current >= proxy.max_connections {
        warn!(addr = %addr, current, "connection limit reached, rejecting");
        let mut stream = stream;
        let _ = stream.try_write(b"HTTP/1.1 503 Service Unavailable\r\n\r\n");
        return;
    }

    proxy.active_connections.fetch_add(1, Ordering::Relaxed);
    let proxy = Arc::clone(proxy);
    tokio::spawn(async move {
        serve_client(&proxy, Client::new(stream, addr)).await;
        proxy.active_connections.fetch_sub(1, Ordering::Relaxed);
    });
}

/// Drives one client connection through as many sequential
/// request/response transactions as it sends (no pipelining: at most one
/// outstanding request at a time), or hands it off to tunnel mode.
async fn serve_client(proxy: &Arc<Proxy>, mut client: Client) {
    loop {
        client.state = ClientState::Init;
        let raw = match read_request(proxy, &mut client).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return, // clean EOF between requests
            Err(e) => {
                respond_error(&mut client, &e).await;
                return;
            }
        };

        let mut q = match Query::new(&raw) {
            Ok(q) => q,
            Err(ProxyError::Halt) => {
                proxy.halt.notify_one();
                return;
            }
            Err(e) => {
                respond_error(&mut client, &e).await;
                return;
            }
        };

        if proxy.filter.is_filtered(&q.request.host) {
            respond_error(&mut client, &ProxyError::Forbidden(q.request.host.clone())).await;
            return;
        }

        match q.request.method {
            Method::Get => {
                client.state = ClientState::Get;
                match handle_get(proxy, &mut client, &mut q).await {
                    Ok(true) => {
                        client.clear_query();
                        client.state = ClientState::Query;
                        client.timestamp();
                    }
                    Ok(false) => return,
                    Err(e) => {
                        respond_error(&mut client, &e).await;
                        return;
                    }
                }
            }
            Method::Connect => {
                client.state = ClientState::Connect;
                // Tunnel mode owns the client for the rest of its life;
                // the connection ends when `handle_connect` returns either way.
                if let Err(e) = handle_connect(proxy, client, &mut q).await {
                    warn!(error = %e, "connect tunnel failed");
                }
                return;
            }
        }
    }
}

/// Reads into `client.buffer` until a complete request header (and any
/// declared body) arrives, respecting the per-client inactivity timeout.
/// `Ok(None)` signals a clean EOF with no bytes read (end of a keep-alive
/// connection).
async fn read_request(proxy: &Arc<Proxy>, client: &mut Client) -> ProxyResult<Option<bytes::Bytes>> {
    loop {
        if let Some(end) = http::header_end(&client.buffer) {
            if let Some(total) = declared_total_len(&client.buffer[..end]) {
                if client.buffer.len() >= end + total {
                    break;
                }
            } else {
                break;
            }
        }

        if client.buffer.len() > MAX_HEADER_BYTES {
            return Err(ProxyError::InvalidHeader("request too large".into()));
        }

        let n = match timeout(proxy.timeout, client.stream.read_buf(&mut client.buffer)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(ProxyError::IoError(e)),
            Err(_) => return Err(ProxyError::PeerClose), // inactivity timeout, close silently
        };
        if n == 0 {
            return if client.buffer.is_empty() { Ok(None) } else { Err(ProxyError::InvalidHeader("truncated request".into())) };
        }
        client.timestamp();
    }

    Ok(Some(client.buffer.split().freeze()))
}

fn declared_total_len(headers: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(headers).ok()?;
    text.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim().eq_ignore_ascii_case("content-length").then(|| value.trim().parse().ok()).flatten()
    })
}

/// `GET` transaction: cache hit serves immediately; a miss fetches from
/// upstream, optionally recolors an HTML body, delivers it, and inserts a
/// cacheable response. Returns whether the connection stays open.
async fn handle_get(proxy: &Arc<Proxy>, client: &mut Client, q: &mut Query) -> ProxyResult<bool> {
    let key = q.request.cache_key();

    let hit = {
        let mut cache = proxy.cache.lock().await;
        cache.get(&key).map(|value| (value, cache.get_age(&key).unwrap_or_default()))
    };

    if let Some((cached, age)) = hit {
        debug!(key, age_secs = age.as_secs(), "cache hit");
        let with_age = http::add_field(&cached.raw, "Age", &age.as_secs().to_string())?;
        client.stream.write_all(&with_age).await?;
        return Ok(!wants_close(&with_age));
    }

    debug!(key, "cache miss");
    q.connect_and_send().await?;
    let response = q.recv_response().await?.clone();

    let out = if response.is_html() {
        let cache = proxy.cache.lock().await;
        let live_keys = cache.key_list();
        let body_text = String::from_utf8_lossy(&response.body);
        let recolored = recolor::recolor_links(&body_text, &live_keys);
        drop(cache);
        splice_body(&response, recolored.as_bytes())?
    } else {
        response.raw.clone()
    };

    client.stream.write_all(&out).await?;

    if should_cache(&response) && crate::memory::has_sufficient_memory() {
        let mut cache = proxy.cache.lock().await;
        cache.put(key, query::clone_response_for_cache(&response), response.max_age);
    }

    q.finish();
    Ok(!wants_close(&response.raw))
}

/// `CONNECT` transaction: replies `200 Connection established`, then
/// either byte-shovels the tunnel in plaintext or terminates TLS at the
/// proxy and re-originates it upstream before shoveling the decrypted
/// stream.
async fn handle_connect(proxy: &Arc<Proxy>, mut client: Client, q: &mut Query) -> ProxyResult<()> {
    match &proxy.intercept {
        None => {
            // Plaintext tunnel: the target must be reachable before we
            // commit to a 200.
            if let Err(e) = q.connect_tunnel().await {
                respond_error(&mut client, &e).await;
                return Err(e);
            }
            let upstream = q.take_socket().ok_or(ProxyError::BadGateway)?;
            client.stream.write_all(b"HTTP/1.1 200 Connection established\r\n\r\n").await?;
            let mut plain = client.stream.into_plain().ok_or(ProxyError::BadGateway)?;
            shovel(&mut plain, upstream).await;
        }
        Some(intercept) => {
            // Interception mode replies first, since the real upstream
            // connection is opened only after the client's TLS handshake
            // reveals the decrypted inner request.
            client.stream.write_all(b"HTTP/1.1 200 Connection established\r\n\r\n").await?;
            let acceptor = tls::mint_leaf_and_build_acceptor(intercept, &q.request.host).await?;
            client.upgrade_to_tls(&acceptor).await?;
            let connector = proxy.connector.as_ref().ok_or(ProxyError::BadGateway)?;
            let upstream_tls = tls::connect(connector, &q.request.host, q.request.port).await?;
            shovel_tls(client, upstream_tls).await?;
        }
    }

    Ok(())
}

/// Bidirectional byte relay for a plaintext tunnel, until either side
/// closes.
async fn shovel(client: &mut TcpStream, mut upstream: TcpStream) {
    let (mut client_read, mut client_write) = client.split();
    let (mut upstream_read, mut upstream_write) = upstream.split();
    let to_upstream = tokio::io::copy(&mut client_read, &mut upstream_write);
    let to_client = tokio::io::copy(&mut upstream_read, &mut client_write);
    tokio::select! {
        _ = to_upstream => {}
        _ = to_client => {}
    }
}

/// Bidirectional relay once TLS interception has decrypted both legs.
/// Consumes both streams: the connection ends when the tunnel does.
async fn shovel_tls(client: Client, upstream: tokio_rustls::client::TlsStream<TcpStream>) -> ProxyResult<()> {
    let crate::client::ClientStream::Tls(tls_box) = client.stream else {
        return Err(ProxyError::TlsError("expected an upgraded client stream".into()));
    };
    let (mut client_read, mut client_write) = tokio::io::split(*tls_box);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);
    let to_upstream = tokio::io::copy(&mut client_read, &mut upstream_write);
    let to_client = tokio::io::copy(&mut upstream_read, &mut client_write);
    tokio::select! {
        _ = to_upstream => {}
        _ = to_client => {}
    }
    Ok(())
}

fn should_cache(response: &crate::http::Response) -> bool {
    response.content_length.is_some() && response.status_code() == Some(200)
}

fn wants_close(raw: &[u8]) -> bool {
    let Some(end) = http::header_end(raw) else { return false };
    let Ok(text) = std::str::from_utf8(&raw[..end]) else { return false };
    text.lines().any(|line| {
        line.split_once(':')
            .map(|(name, value)| name.trim().eq_ignore_ascii_case("connection") && value.trim().eq_ignore_ascii_case("close"))
            .unwrap_or(false)
    })
}

/// Rebuilds a response's header+body with `new_body` in place of the
/// original, updating `Content-Length` to match — used after recoloring
/// changes the body's length.
fn splice_body(response: &crate::http::Response, new_body: &[u8]) -> ProxyResult<bytes::Bytes> {
    let end = http::header_end(&response.raw).ok_or(ProxyError::InvalidResponse)?;
    let header = http::add_field(&response.raw[..end], "Content-Length", &new_body.len().to_string())?;
    let mut out = Vec::with_capacity(header.len() + new_body.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(new_body);
    Ok(bytes::Bytes::from(out))
}

async fn respond_error(client: &mut Client, error: &ProxyError) {
    if let Some(line) = error.response_line() {
        let _ = client.stream.write_all(line.as_bytes()).await;
    }
    let _ = client.stream.shutdown().await;
}
