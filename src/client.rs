//! The downstream side of one TCP connection: accept socket, optional TLS
//! session, receive buffer, owned `Query`, and connection-lifecycle state.
//!
//! Grounded on `examples/original_source/proxy/src/client.c`
//! (`Client_new`/`Client_free`/`Client_timestamp`/`Client_compare`), with
//! the manual `fd`-indexed bookkeeping replaced by an owned
//! [`tokio::net::TcpStream`] (or its TLS-wrapped counterpart) under a
//! task-per-connection model.

use std::net::SocketAddr;
use std::time::Instant;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream as ServerTlsStream;
use tokio_rustls::TlsAcceptor;

use crate::error::{ProxyError, ProxyResult};
use crate::query::Query;

const INITIAL_BUFFER_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Init,
    Query,
    Get,
    Connect,
    Ssl,
    Tunnel,
    Close,
}

/// Either a plain TCP stream or a TLS-terminated one (once interception
/// has completed its accept-side handshake).
pub enum ClientStream {
    Plain(TcpStream),
    Tls(Box<ServerTlsStream<TcpStream>>),
}

impl ClientStream {
    pub async fn read_buf(&mut self, buf: &mut BytesMut) -> std::io::Result<usize> {
        match self {
            ClientStream::Plain(s) => s.read_buf(buf).await,
            ClientStream::Tls(s) => s.read_buf(buf).await,
        }
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            ClientStream::Plain(s) => s.write_all(buf).await,
            ClientStream::Tls(s) => s.write_all(buf).await,
        }
    }

    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            ClientStream::Plain(s) => s.shutdown().await,
            ClientStream::Tls(s) => s.shutdown().await,
        }
    }

    pub fn into_plain(self) -> Option<TcpStream> {
        match self {
            ClientStream::Plain(s) => Some(s),
            ClientStream::Tls(_) => None,
        }
    }

    /// Consumes a plain stream and completes a server-side TLS handshake
    /// over it, per `ProxySSL_handshake`. Returns an error (and the
    /// original stream is dropped) if already upgraded.
    pub async fn upgrade_via(self, acceptor: &TlsAcceptor) -> ProxyResult<ClientStream> {
        match self {
            ClientStream::Plain(tcp) => {
                let tls = acceptor.accept(tcp).await.map_err(|e| ProxyError::TlsError(e.to_string()))?;
                Ok(ClientStream::Tls(Box::new(tls)))
            }
            ClientStream::Tls(_) => Err(ProxyError::TlsError("stream is already TLS".into())),
        }
    }
}

pub struct Client {
    pub stream: ClientStream,
    pub peer_addr: SocketAddr,
    pub buffer: BytesMut,
    pub query: Option<Query>,
    pub state: ClientState,
    pub last_active: Instant,
}

impl Client {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        Client {
            stream: ClientStream::Plain(stream),
            peer_addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            query: None,
            state: ClientState::Init,
            last_active: Instant::now(),
        }
    }

    /// Records `last_active = now`, per `Client_timestamp`.
    pub fn timestamp(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn is_inactive(&self, timeout: std::time::Duration) -> bool {
        self.last_active.elapsed() >= timeout
    }

    pub fn set_addr(&mut self, addr: SocketAddr) {
        self.peer_addr = addr;
    }

    pub fn clear_query(&mut self) {
        self.query = None;
    }

    pub async fn upgrade_to_tls(&mut self, acceptor: &TlsAcceptor) -> ProxyResult<()> {
        self.stream = self.stream.upgrade_via(acceptor).await?;
        self.state = ClientState::Ssl;
        Ok(())
    }

    /// `fd`-identity comparison in the original becomes peer-address
    /// comparison here; both sockets are owned exclusively by one Client.
    pub fn compare(&self, other: &Client) -> bool {
        self.peer_addr == other.peer_addr
    }
}
