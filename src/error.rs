//! Error taxonomy for the proxy core.
//!
//! Parsing and cache errors are returned as values up to the handler
//! boundary, where [`ProxyError::status_code`] maps them to the HTTP status
//! the client sees. I/O errors never propagate past the connection they
//! arose on; `Halt` is the only variant that is allowed to unwind the accept
//! loop.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("invalid request")]
    InvalidRequest,

    #[error("invalid response")]
    InvalidResponse,

    #[error("unsupported method: {0}")]
    BadMethod(String),

    #[error("malformed url: {0}")]
    BadUrl(String),

    #[error("invalid port: {0}")]
    BadPort(String),

    #[error("upstream host unknown: {0}")]
    HostUnknown(String),

    #[error("upstream connect/fetch failed")]
    BadGateway,

    #[error("host is filtered: {0}")]
    Forbidden(String),

    #[error("peer closed the connection")]
    PeerClose,

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("tls error: {0}")]
    TlsError(String),

    /// Never user-visible; signals the cache that an eviction is required
    /// before the insert can proceed. Handled internally by `Cache::put`.
    #[error("cache is full")]
    CacheFull,

    /// The only error-shaped value allowed to break the accept loop.
    #[error("halt requested")]
    Halt,
}

impl ProxyError {
    /// Maps an error to the HTTP status the client should see, per the
    /// failure semantics of the proxy core. Returns `None` for errors that
    /// never reach a client (connection is simply closed).
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProxyError::InvalidHeader(_) | ProxyError::InvalidRequest => Some(400),
            ProxyError::BadUrl(_) | ProxyError::BadPort(_) => Some(400),
            ProxyError::Forbidden(_) => Some(403),
            ProxyError::BadMethod(_) => Some(501),
            ProxyError::HostUnknown(_) | ProxyError::BadGateway => Some(502),
            ProxyError::InvalidResponse => Some(502),
            ProxyError::TlsError(_) => Some(502),
            ProxyError::PeerClose | ProxyError::IoError(_) => None,
            ProxyError::CacheFull | ProxyError::Halt => None,
        }
    }

    /// Renders the minimal `HTTP/1.1 <code> <reason>\r\n\r\n` response the
    /// proxy sends for an error, with an empty body (per spec: the client
    /// sees a bare status line and no body).
    pub fn response_line(&self) -> Option<&'static str> {
        match self.status_code()? {
            400 => Some("HTTP/1.1 400 Bad Request\r\n\r\n"),
            403 => Some("HTTP/1.1 403 Forbidden\r\n\r\n"),
            404 => Some("HTTP/1.1 404 Not Found\r\n\r\n"),
            405 => Some("HTTP/1.1 405 Method Not Allowed\r\n\r\n"),
            407 => Some("HTTP/1.1 407 Proxy Authentication Required\r\n\r\n"),
            418 => Some("HTTP/1.1 418 I'm a teapot\r\n\r\n"),
            500 => Some("HTTP/1.1 500 Internal Server Error\r\n\r\n"),
            501 => Some("HTTP/1.1 501 Not Implemented\r\n\r\n"),
            502 => Some("HTTP/1.1 502 Bad Gateway\r\n\r\n"),
            503 => Some("HTTP/1.1 503 Service Unavailable\r\n\r\n"),
            _ => None,
        }
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_method_maps_to_501() {
        let e = ProxyError::BadMethod("POST".into());
        assert_eq!(e.status_code(), Some(501));
        assert_eq!(e.response_line(), Some("HTTP/1.1 501 Not Implemented\r\n\r\n"));
    }

    #[test]
    fn io_error_has_no_status() {
        let e = ProxyError::IoError(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "x"));
        assert_eq!(e.status_code(), None);
    }

    #[test]
    fn halt_has_no_status() {
        assert_eq!(ProxyError::Halt.status_code(), None);
    }
}
