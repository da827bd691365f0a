//! The upstream side of one transaction: resolved address, upstream
//! socket, receive buffer, and the request/response pair it carries.
//!
//! Grounded on `examples/original_source/proxy/src/query.c`
//! (`Query_new`/`Query_free`) and the select-loop states it's driven
//! through in `proxy.c`. The manual non-blocking connect + readiness-driven
//! recv loop of the original collapses here into `async`/`.await` on a
//! `tokio::net::TcpStream`; the state field is kept so the transaction's
//! lifecycle stays observable and testable rather than implicit in
//! control flow.

use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::{ProxyError, ProxyResult};
use crate::http::{self, Request, Response};

const INITIAL_BUFFER_CAPACITY: usize = 4096;
const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Init,
    SentRequest,
    RecvdResponse,
    Done,
    Tunnel,
}

pub struct Query {
    pub request: Request,
    pub response: Option<Response>,
    socket: Option<TcpStream>,
    buffer: BytesMut,
    pub state: QueryState,
    pub started_at: Instant,
}

impl Query {
    /// Parses `raw` into a [`Request`] and constructs a `Query` in
    /// `Init` state with no socket yet opened. Returns
    /// [`ProxyError::Halt`] if `raw`'s method token is the halt sentinel,
    /// surfacing it to the caller rather than treating it as a bad method.
    pub fn new(raw: &[u8]) -> ProxyResult<Query> {
        let request = http::parse_request(raw)?;
        Ok(Query {
            request,
            response: None,
            socket: None,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            state: QueryState::Init,
            started_at: Instant::now(),
        })
    }

    /// Opens the upstream TCP connection and writes the forwarded request
    /// bytes (the retained `raw` slice, never a resynthesized copy).
    /// Transitions `Init -> SentRequest`.
    pub async fn connect_and_send(&mut self) -> ProxyResult<()> {
        let addr = format!("{}:{}", self.request.host, self.request.port);
        let mut socket = TcpStream::connect(&addr)
            .await
            .map_err(|_| ProxyError::HostUnknown(self.request.host.clone()))?;
        socket.write_all(&self.request.raw).await?;
        self.socket = Some(socket);
        self.state = QueryState::SentRequest;
        debug!(host = %self.request.host, port = self.request.port, "query connected and sent");
        Ok(())
    }

    /// Opens the upstream connection for a `CONNECT` tunnel without
    /// sending any request bytes. Transitions `Init -> Tunnel`.
    pub async fn connect_tunnel(&mut self) -> ProxyResult<()> {
        let addr = format!("{}:{}", self.request.host, self.request.port);
        let socket = TcpStream::connect(&addr)
            .await
            .map_err(|_| ProxyError::HostUnknown(self.request.host.clone()))?;
        self.socket = Some(socket);
        self.state = QueryState::Tunnel;
        Ok(())
    }

    /// Drains the upstream socket until a complete response is available:
    /// `Content-Length` bytes received past the header, or peer EOF when
    /// absent. A `Content-Length`-less response on a still-open connection
    /// is never cached, but is still delivered in full once the peer
    /// closes. Transitions `SentRequest -> RecvdResponse`.
    pub async fn recv_response(&mut self) -> ProxyResult<&Response> {
        let socket = self.socket.as_mut().ok_or(ProxyError::BadGateway)?;
        let mut chunk = [0u8; 8192];

        loop {
            if let Some(header_len) = find_header_end(&self.buffer) {
                if let Some(total_len) = expected_total_len(&self.buffer, header_len) {
                    if self.buffer.len() >= total_len {
                        break;
                    }
                }
            }

            if self.buffer.len() > MAX_RESPONSE_BYTES {
                return Err(ProxyError::InvalidResponse);
            }

            let n = socket.read(&mut chunk).await?;
            if n == 0 {
                break; // peer EOF: connection-close framing, or a truncated header
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }

        if !http::has_complete_header(&self.buffer) {
            warn!("upstream closed before a complete header arrived");
            return Err(ProxyError::InvalidResponse);
        }

        let response = http::parse_response(&self.buffer)?;
        self.response = Some(response);
        self.state = QueryState::RecvdResponse;
        Ok(self.response.as_ref().expect("just assigned"))
    }

    pub fn finish(&mut self) {
        self.state = QueryState::Done;
    }

    /// Takes the upstream socket for bidirectional tunneling, leaving the
    /// `Query` without one — mirrors `Query_free`'s socket release on
    /// every exit path, just deferred to whichever side consumes it.
    pub fn take_socket(&mut self) -> Option<TcpStream> {
        self.socket.take()
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == http::HEADER_TERMINATOR).map(|i| i + 4)
}

/// `None` means "no declared length, frame by connection close".
fn expected_total_len(buf: &[u8], header_len: usize) -> Option<usize> {
    let headers = std::str::from_utf8(&buf[..header_len]).ok()?;
    headers.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.eq_ignore_ascii_case("content-length") {
            value.trim().parse::<usize>().ok().map(|n| header_len + n)
        } else {
            None
        }
    })
}

/// Forwards the request body/headers bytes that constitute a
/// ready-to-cache deep copy — used by the proxy loop when inserting into
/// the cache so the `Query`'s own copy remains intact for delivery to the
/// client.
pub fn clone_response_for_cache(response: &Response) -> Response {
    Response {
        version: response.version.clone(),
        status_line: response.status_line.clone(),
        cache_control: response.cache_control.clone(),
        max_age: response.max_age,
        content_length: response.content_length,
        body: Bytes::clone(&response.body),
        raw: Bytes::clone(&response.raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_parses_request_and_starts_in_init() {
        let raw = b"GET /a HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let q = Query::new(raw).unwrap();
        assert_eq!(q.state, QueryState::Init);
        assert_eq!(q.request.host, "example.com");
    }

    #[test]
    fn halt_sentinel_surfaces_as_halt_error() {
        let raw = b"__halt__ / HTTP/1.1\r\n\r\n";
        assert!(matches!(Query::new(raw), Err(ProxyError::Halt)));
    }

    #[test]
    fn expected_total_len_reads_content_length() {
        let buf = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHELLO";
        let header_len = find_header_end(buf).unwrap();
        assert_eq!(expected_total_len(buf, header_len), Some(header_len + 5));
    }

    #[test]
    fn expected_total_len_is_none_without_content_length() {
        let buf = b"HTTP/1.1 200 OK\r\n\r\n";
        let header_len = find_header_end(buf).unwrap();
        assert_eq!(expected_total_len(buf, header_len), None);
    }
}
