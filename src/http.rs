//! HTTP/1.1 header parser and serializer.
//!
//! Parses request/response headers out of a buffer known to contain at
//! least one complete header section (terminated by `\r\n\r\n`), builds raw
//! forwarding requests, and splices header fields. The `httparse`-based
//! tokenizing approach is generalized to the full
//! host/port/absolute-URI/Cache-Control contract of the original
//! `examples/original_source/proxy/src/http.c` (`parse_host`, `parse_port`,
//! `parse_maxage`, `HTTP_add_field`).

use std::time::Duration;

use bytes::Bytes;

use crate::error::{ProxyError, ProxyResult};

pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
pub const DEFAULT_MAX_AGE: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Connect,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Connect => "CONNECT",
        }
    }
}

/// A fully parsed request. `raw` is the exact byte sequence that produced
/// every other field; it is never resynthesized for forwarding.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub target: String,
    pub version: String,
    pub host: String,
    pub port: u16,
    pub body: Bytes,
    pub raw: Bytes,
}

impl Request {
    /// `host || path`, the cache key every entry is stored and looked up by.
    pub fn cache_key(&self) -> String {
        format!("{}{}", self.host, self.path())
    }

    /// The path component of `target`, stripping scheme/authority if the
    /// target was given in absolute form.
    pub fn path(&self) -> &str {
        match split_absolute_form(&self.target) {
            Some((_, _, path)) => path,
            None => self.target.as_str(),
        }
    }
}

/// A fully parsed response. `raw` is the exact wire bytes (header + body).
#[derive(Debug, Clone)]
pub struct Response {
    pub version: String,
    pub status_line: String,
    pub cache_control: Option<String>,
    pub max_age: Duration,
    pub content_length: Option<usize>,
    pub body: Bytes,
    pub raw: Bytes,
}

impl Response {
    pub fn status_code(&self) -> Option<u16> {
        self.status_line
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
    }

    pub fn is_html(&self) -> bool {
        // The proxy only tracks Content-Length/Cache-Control explicitly;
        // Content-Type isn't part of the data model, so HTML-ness is
        // inferred from the body itself, matching the original's
        // recoloring path which operates unconditionally on cacheable
        // bodies that contain anchor tags.
        let probe = &self.body[..self.body.len().min(512)];
        let probe = String::from_utf8_lossy(probe);
        let probe_lower = probe.to_ascii_lowercase();
        probe_lower.contains("<html") || probe_lower.contains("<a ") || probe_lower.contains("<!doctype html")
    }
}

/// Returns `true` once `buf` contains a complete header section.
pub fn has_complete_header(buf: &[u8]) -> bool {
    find_subslice(buf, HEADER_TERMINATOR).is_some()
}

/// Byte offset one past the header terminator, if `buf` contains one.
pub fn header_end(buf: &[u8]) -> Option<usize> {
    find_subslice(buf, HEADER_TERMINATOR).map(|i| i + HEADER_TERMINATOR.len())
}

/// Parses an HTTP/1.1 request header (and any trailing body bytes already
/// present in `buf`) into a [`Request`].
pub fn parse_request(buf: &[u8]) -> ProxyResult<Request> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut headers);

    let header_len = match req.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => {
            return Err(ProxyError::InvalidHeader("incomplete header".into()))
        }
        Err(e) => return Err(ProxyError::InvalidHeader(e.to_string())),
    };

    let method_str = req.method.ok_or_else(|| ProxyError::InvalidHeader("missing method".into()))?;
    if method_str == crate::HALT_METHOD {
        return Err(ProxyError::Halt);
    }
    let method = match method_str {
        "GET" => Method::Get,
        "CONNECT" => Method::Connect,
        other => return Err(ProxyError::BadMethod(other.to_string())),
    };

    let target = req.path.ok_or_else(|| ProxyError::InvalidHeader("missing target".into()))?.to_string();
    let version = match req.version {
        Some(1) => "HTTP/1.1".to_string(),
        Some(0) => "HTTP/1.0".to_string(),
        _ => "HTTP/1.1".to_string(),
    };

    let host_header = find_header(req.headers, "host");

    let (host, port) = resolve_host_port(method, &target, host_header)?;

    let content_length = find_header(req.headers, "content-length")
        .map(|v| v.trim().parse::<usize>())
        .transpose()
        .map_err(|_| ProxyError::InvalidHeader("bad content-length".into()))?;

    let body = extract_body(buf, header_len, content_length);

    Ok(Request {
        method,
        target,
        version,
        host,
        port,
        body,
        raw: Bytes::copy_from_slice(buf),
    })
}

/// Parses an HTTP/1.1 response header plus whatever body bytes are already
/// present in `buf` (the caller has already read to `Content-Length` or to
/// EOF, per the connection-close framing rule).
pub fn parse_response(buf: &[u8]) -> ProxyResult<Response> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut res = httparse::Response::new(&mut headers);

    let header_len = match res.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => {
            return Err(ProxyError::InvalidHeader("incomplete header".into()))
        }
        Err(e) => return Err(ProxyError::InvalidHeader(e.to_string())),
    };

    let code = res.code.ok_or(ProxyError::InvalidResponse)?;
    let reason = res.reason.unwrap_or("");
    let version = match res.version {
        Some(1) => "HTTP/1.1".to_string(),
        Some(0) => "HTTP/1.0".to_string(),
        _ => "HTTP/1.1".to_string(),
    };
    let status_line = format!("{version} {code} {reason}");

    let content_length = find_header(res.headers, "content-length")
        .map(|v| v.trim().parse::<usize>())
        .transpose()
        .map_err(|_| ProxyError::InvalidHeader("bad content-length".into()))?;

    let cache_control = find_header(res.headers, "cache-control").map(str::to_string);
    let max_age = cache_control
        .as_deref()
        .and_then(parse_max_age)
        .unwrap_or(Duration::from_secs(DEFAULT_MAX_AGE));

    let body = extract_body(buf, header_len, content_length);

    Ok(Response {
        version,
        status_line,
        cache_control,
        max_age,
        content_length,
        body,
        raw: Bytes::copy_from_slice(buf),
    })
}

/// Extracts the unsigned decimal after a `max-age=` token within a
/// `Cache-Control` value. Returns `None` if absent or malformed (caller
/// substitutes the configured default).
pub fn parse_max_age(cache_control: &str) -> Option<Duration> {
    let lower = cache_control.to_ascii_lowercase();
    let idx = lower.find("max-age=")?;
    let rest = lower[idx + "max-age=".len()..].trim_start();
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<u64>().ok().map(Duration::from_secs)
}

/// Builds a raw request for forwarding:
/// `METHOD SP target SP HTTP/1.1 CRLF [Host: host[:port] CRLF] CRLF [body]`.
pub fn emit_request(
    method: Method,
    target: &str,
    host: Option<&str>,
    port: Option<u16>,
    body: Option<&[u8]>,
) -> Bytes {
    let mut out = Vec::with_capacity(target.len() + body.map(<[u8]>::len).unwrap_or(0) + 128);
    out.extend_from_slice(method.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(target.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");
    if let Some(host) = host {
        out.extend_from_slice(b"Host: ");
        out.extend_from_slice(host.as_bytes());
        if let Some(port) = port {
            out.push(b':');
            out.extend_from_slice(port.to_string().as_bytes());
        }
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    if let Some(body) = body {
        out.extend_from_slice(body);
    }
    Bytes::from(out)
}

/// Adds or replaces a single header field, preserving every other byte
/// (including the trailing `CRLF CRLF` and any body). If `name` already
/// appears as a header line, its value is replaced in place; otherwise the
/// field is spliced in immediately after the start line.
pub fn add_field(header: &[u8], name: &str, value: &str) -> ProxyResult<Bytes> {
    if find_subslice(header, HEADER_TERMINATOR).is_none() {
        return Err(ProxyError::InvalidHeader("no header terminator".into()));
    }

    let start_line_end = find_subslice(header, b"\r\n")
        .ok_or_else(|| ProxyError::InvalidHeader("no start line".into()))?
        + 2;

    let name_prefix = format!("{name}:");
    if let Some(existing) = find_header_line(&header[start_line_end..], &name_prefix) {
        let (line_start, line_end) = (start_line_end + existing.0, start_line_end + existing.1);
        let mut out = Vec::with_capacity(header.len() + value.len() + name.len() + 4);
        out.extend_from_slice(&header[..line_start]);
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(&header[line_end..]);
        return Ok(Bytes::from(out));
    }

    let mut out = Vec::with_capacity(header.len() + name.len() + value.len() + 4);
    out.extend_from_slice(&header[..start_line_end]);
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&header[start_line_end..]);
    Ok(Bytes::from(out))
}

/// Finds an existing `name:`-prefixed header line within `headers` (which
/// starts right after the request/status line). Returns the byte range of
/// the full line, CRLF excluded, relative to the start of `headers`.
fn find_header_line(headers: &[u8], name_prefix: &str) -> Option<(usize, usize)> {
    let mut offset = 0;
    while offset < headers.len() {
        let rest = &headers[offset..];
        if rest.starts_with(b"\r\n") {
            break; // reached the blank line terminator
        }
        let line_len = find_subslice(rest, b"\r\n")?;
        let line = &rest[..line_len];
        if line.len() >= name_prefix.len()
            && line[..name_prefix.len()].eq_ignore_ascii_case(name_prefix.as_bytes())
        {
            return Some((offset, offset + line_len));
        }
        offset += line_len + 2;
    }
    None
}

fn extract_body(buf: &[u8], header_len: usize, content_length: Option<usize>) -> Bytes {
    let available = &buf[header_len.min(buf.len())..];
    match content_length {
        Some(n) => Bytes::copy_from_slice(&available[..n.min(available.len())]),
        None => Bytes::copy_from_slice(available),
    }
}

fn find_header<'a>(headers: &'a [httparse::Header<'a>], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .and_then(|h| std::str::from_utf8(h.value).ok())
}

/// `scheme://host[:port]/path` → `(scheme, authority, path)`.
fn split_absolute_form(target: &str) -> Option<(&str, &str, &str)> {
    let (scheme, rest) = target.split_once("://")?;
    let path_start = rest.find('/').unwrap_or(rest.len());
    let authority = &rest[..path_start];
    let path = if path_start == rest.len() { "/" } else { &rest[path_start..] };
    Some((scheme, authority, path))
}

fn split_host_port(authority: &str) -> (String, Option<u16>) {
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.chars().all(|c| c.is_ascii_digit()) && !port.is_empty() => {
            (host.to_string(), port.parse().ok())
        }
        _ => (authority.to_string(), None),
    }
}

fn resolve_host_port(method: Method, target: &str, host_header: Option<&str>) -> ProxyResult<(String, u16)> {
    if method == Method::Connect {
        let (host, port) = split_host_port(target);
        let port = port.ok_or_else(|| ProxyError::BadPort(target.to_string()))?;
        return Ok((host, port));
    }

    if let Some((scheme, authority, _)) = split_absolute_form(target) {
        let (host, port) = split_host_port(authority);
        let port = port.unwrap_or(default_port_for_scheme(scheme));
        return Ok((host, port));
    }

    let host_header = host_header.ok_or_else(|| ProxyError::BadUrl(target.to_string()))?;
    let (host, port) = split_host_port(host_header);
    Ok((host, port.unwrap_or(80)))
}

fn default_port_for_scheme(scheme: &str) -> u16 {
    if scheme.eq_ignore_ascii_case("https") {
        443
    } else {
        80
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_origin_form_get_with_host_header() {
        let raw = b"GET /a HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let req = parse_request(raw).unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.host, "example.com");
        assert_eq!(req.port, 80);
        assert_eq!(req.path(), "/a");
    }

    #[test]
    fn parses_absolute_form_get_without_host_header() {
        let raw = b"GET http://example.com:8080/a HTTP/1.1\r\n\r\n";
        let req = parse_request(raw).unwrap();
        assert_eq!(req.host, "example.com");
        assert_eq!(req.port, 8080);
        assert_eq!(req.path(), "/a");
    }

    #[test]
    fn parses_connect_authority_form() {
        let raw = b"CONNECT example.com:443 HTTP/1.1\r\n\r\n";
        let req = parse_request(raw).unwrap();
        assert_eq!(req.method, Method::Connect);
        assert_eq!(req.host, "example.com");
        assert_eq!(req.port, 443);
    }

    #[test]
    fn rejects_unknown_method() {
        let raw = b"POST /a HTTP/1.1\r\nHost: example.com\r\n\r\n";
        assert!(matches!(parse_request(raw), Err(ProxyError::BadMethod(_))));
    }

    #[test]
    fn recognizes_halt_sentinel() {
        let raw = b"__halt__ / HTTP/1.1\r\n\r\n";
        assert!(matches!(parse_request(raw), Err(ProxyError::Halt)));
    }

    #[test]
    fn header_exactly_at_terminator_parses_with_empty_body() {
        let raw = b"GET / HTTP/1.1\r\nHost: h\r\n\r\n";
        let req = parse_request(raw).unwrap();
        assert!(req.body.is_empty());
    }

    #[test]
    fn parses_response_with_max_age() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nCache-Control: max-age=60\r\n\r\nHELLO";
        let res = parse_response(raw).unwrap();
        assert_eq!(res.status_code(), Some(200));
        assert_eq!(res.max_age, Duration::from_secs(60));
        assert_eq!(&res.body[..], b"HELLO");
    }

    #[test]
    fn missing_max_age_uses_default() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
        let res = parse_response(raw).unwrap();
        assert_eq!(res.max_age, Duration::from_secs(DEFAULT_MAX_AGE));
    }

    #[test]
    fn whitespace_only_max_age_value_yields_default() {
        assert_eq!(parse_max_age("max-age= "), None);
        assert_eq!(parse_max_age("public"), None);
    }

    #[test]
    fn content_length_zero_with_no_body_is_valid() {
        let raw = b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n";
        let res = parse_response(raw).unwrap();
        assert_eq!(res.content_length, Some(0));
        assert!(res.body.is_empty());
    }

    #[test]
    fn add_field_inserts_after_start_line() {
        let header = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHELLO";
        let out = add_field(header, "Age", "12").unwrap();
        assert!(out.starts_with(b"HTTP/1.1 200 OK\r\nAge: 12\r\n"));
        assert!(out.ends_with(b"\r\n\r\nHELLO"));
    }

    #[test]
    fn add_field_is_idempotent_by_name() {
        let header = b"HTTP/1.1 200 OK\r\n\r\n";
        let once = add_field(header, "Age", "12").unwrap();
        let twice = add_field(&once, "Age", "12").unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn add_field_replaces_existing_value() {
        let header = b"HTTP/1.1 200 OK\r\nAge: 1\r\n\r\n";
        let out = add_field(header, "Age", "99").unwrap();
        assert_eq!(&out[..], b"HTTP/1.1 200 OK\r\nAge: 99\r\n\r\n");
    }

    #[test]
    fn emit_then_parse_round_trips_fields() {
        let raw = emit_request(Method::Get, "/a", Some("example.com"), Some(8080), None);
        let req = parse_request(&raw).unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.host, "example.com");
        assert_eq!(req.port, 8080);
        assert_eq!(req.path(), "/a");
        assert_eq!(&req.raw[..], &raw[..]);
    }
}
