//! TLS interception: server-side handshake against the client using a
//! dynamically minted leaf certificate, and client-side handshake to the
//! real upstream with full peer verification.
//!
//! Grounded on `examples/original_source/proxy/src/proxy.c`'s
//! `ProxySSL_handshake` (accept-side, drives an external helper then loads
//! the resulting cert) and `ProxySSL_connect` (connect-side,
//! `SSL_VERIFY_PEER | SSL_VERIFY_FAIL_IF_NO_PEER_CERT`). The OpenSSL
//! context/handshake pair maps onto `tokio_rustls`'s `TlsAcceptor`/
//! `TlsConnector`, following the connector idiom in
//! `npolshakova-agentgateway`'s `crates/agentgateway/src/client/tls.rs`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::debug;

use crate::error::{ProxyError, ProxyResult};

/// Directs where minted leaf certs live and how to mint them.
#[derive(Debug, Clone)]
pub struct InterceptConfig {
    pub cert_helper: PathBuf,
    pub cert_dir: PathBuf,
}

/// Invokes the external helper to (re)generate `<hostname>.crt`/`.key`
/// under `cert_dir`, then builds a single-host [`ServerConfig`] from them.
/// Mirrors `ProxySSL_updateExtFile` + `ProxySSL_updateContext`: the helper
/// script and CA material stay an external collaborator, the proxy only
/// reloads the resulting leaf.
pub async fn mint_leaf_and_build_acceptor(cfg: &InterceptConfig, hostname: &str) -> ProxyResult<TlsAcceptor> {
    let status = Command::new(&cfg.cert_helper)
        .arg(hostname)
        .status()
        .await
        .map_err(|e| ProxyError::TlsError(format!("cert helper failed to start: {e}")))?;
    if !status.success() {
        return Err(ProxyError::TlsError(format!("cert helper exited with {status}")));
    }

    let cert_path = cfg.cert_dir.join(format!("{hostname}.crt"));
    let key_path = cfg.cert_dir.join(format!("{hostname}.key"));
    let certs = load_certs(&cert_path)?;
    let key = load_private_key(&key_path)?;

    let server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ProxyError::TlsError(e.to_string()))?;

    debug!(hostname, "minted intercept leaf and built acceptor");
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Completes the accept-side handshake with the client using `acceptor`.
pub async fn accept(acceptor: &TlsAcceptor, stream: TcpStream) -> ProxyResult<tokio_rustls::server::TlsStream<TcpStream>> {
    acceptor
        .accept(stream)
        .await
        .map_err(|e| ProxyError::TlsError(e.to_string()))
}

/// Builds a verifying connector rooted at the platform's native trust
/// store. `SSL_VERIFY_PEER | SSL_VERIFY_FAIL_IF_NO_PEER_CERT`'s equivalent
/// here is simply "no `dangerous()` overrides": rustls always validates
/// the chain and the SAN hostname (no wildcard support beyond what rustls
/// itself grants) unless explicitly told not to.
pub fn build_connector() -> ProxyResult<TlsConnector> {
    let mut roots = RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().certs {
        // Malformed platform entries are skipped rather than failing the
        // whole store, matching the native-certs crate's own guidance.
        let _ = roots.add(cert);
    }
    let config = ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Connects to `host:port` over TCP, then performs a verified TLS
/// handshake with SAN hostname checking against `host`.
pub async fn connect(connector: &TlsConnector, host: &str, port: u16) -> ProxyResult<tokio_rustls::client::TlsStream<TcpStream>> {
    let tcp = TcpStream::connect((host, port))
        .await
        .map_err(|_| ProxyError::HostUnknown(host.to_string()))?;
    let server_name = ServerName::try_from(host.to_string()).map_err(|_| ProxyError::BadUrl(host.to_string()))?;
    connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| ProxyError::TlsError(e.to_string()))
}

fn load_certs(path: &Path) -> ProxyResult<Vec<CertificateDer<'static>>> {
    let bytes = std::fs::read(path)?;
    rustls_pemfile::certs(&mut bytes.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProxyError::TlsError(format!("bad cert at {}: {e}", path.display())))
}

fn load_private_key(path: &Path) -> ProxyResult<PrivateKeyDer<'static>> {
    let bytes = std::fs::read(path)?;
    rustls_pemfile::private_key(&mut bytes.as_slice())
        .map_err(|e| ProxyError::TlsError(format!("bad key at {}: {e}", path.display())))?
        .ok_or_else(|| ProxyError::TlsError(format!("no private key found in {}", path.display())))
}
