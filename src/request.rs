// Copyright (c) 2016 The fixturehall developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Parses the bytes of an HTTP/1.1 request into a structured [`HttpRequest`].
//!
//! Header parsing is delegated to `httparse`, the same crate this codebase already reaches for
//! in its own socket handler; only request-target/body bookkeeping specific to this server's
//! model (body-as-opaque-bytes, single mandatory `Host`) is hand-rolled on top of it.

use uuid::Uuid;

/// The HTTP methods this server understands. Any other request-line token is a parse failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Trace,
    Connect,
}

impl Method {
    fn parse(token: &str) -> Option<Method> {
        Some(match_ignore_ascii_case(token)?)
    }

    /// The upper-case wire representation, e.g. `"DELETE"`.
    pub fn as_str(&self) -> &'static str {
        match *self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
        }
    }
}

fn match_ignore_ascii_case(token: &str) -> Option<Method> {
    if token.eq_ignore_ascii_case("GET") {
        Some(Method::Get)
    } else if token.eq_ignore_ascii_case("POST") {
        Some(Method::Post)
    } else if token.eq_ignore_ascii_case("PUT") {
        Some(Method::Put)
    } else if token.eq_ignore_ascii_case("DELETE") {
        Some(Method::Delete)
    } else if token.eq_ignore_ascii_case("HEAD") {
        Some(Method::Head)
    } else if token.eq_ignore_ascii_case("OPTIONS") {
        Some(Method::Options)
    } else if token.eq_ignore_ascii_case("TRACE") {
        Some(Method::Trace)
    } else if token.eq_ignore_ascii_case("CONNECT") {
        Some(Method::Connect)
    } else {
        None
    }
}

/// A single header name with its (possibly repeated) values, in the order they were received.
pub type HeaderList = Vec<(String, String)>;

/// A fully parsed, immutable HTTP/1.1 request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    id: Uuid,
    version: String,
    method: Method,
    uri: String,
    path: String,
    headers: HeaderList,
    body: Vec<u8>,
}

/// Why [`HttpRequest::parse`] rejected a buffer. The server never surfaces this type to the
/// embedder directly; dispatch (`registry::dispatch`) turns it into a canned 400 response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Malformed;

impl HttpRequest {
    /// Parses one complete HTTP/1.1 request out of `buf`.
    ///
    /// `buf` is assumed to contain exactly one request: the request line, headers, an empty
    /// CRLF line, and then the body (if any). The connection state machine is responsible for
    /// having collected that much before calling this function. A buffer that doesn't yet hold a
    /// full set of headers parses as `Malformed` rather than "need more data" — incremental
    /// framing is the connection state machine's job (it only calls `parse` once it has found
    /// the header/body boundary itself).
    pub fn parse(buf: &[u8]) -> Result<HttpRequest, Malformed> {
        let mut header_storage = [httparse::EMPTY_HEADER; 64];
        let mut parsed = httparse::Request::new(&mut header_storage);
        let head_len = match parsed.parse(buf) {
            Ok(httparse::Status::Complete(n)) => n,
            Ok(httparse::Status::Partial) => return Err(Malformed),
            Err(_) => return Err(Malformed),
        };

        let method_tok = parsed.method.ok_or(Malformed)?;
        let method = Method::parse(method_tok).ok_or(Malformed)?;
        let target = parsed.path.ok_or(Malformed)?;
        let version_minor = parsed.version.ok_or(Malformed)?;
        let version = format!("HTTP/1.{}", version_minor);

        let mut headers = HeaderList::new();
        for h in parsed.headers.iter() {
            let value = std::str::from_utf8(h.value).map_err(|_| Malformed)?.trim().to_owned();
            headers.push((h.name.to_owned(), value));
        }

        let host = {
            let mut hosts = headers.iter().filter(|(k, _)| k.eq_ignore_ascii_case("Host"));
            let first = hosts.next().ok_or(Malformed)?;
            if hosts.next().is_some() {
                return Err(Malformed);
            }
            first.1.clone()
        };

        let uri = format!("http://{}{}", host, target);
        let path = target.splitn(2, '?').next().unwrap_or(target).to_owned();
        let body = buf[head_len..].to_vec();

        Ok(HttpRequest {
            id: Uuid::new_v4(),
            version,
            method,
            uri,
            path,
            headers,
            body,
        })
    }

    /// Builds a request directly from already-parsed parts, for tests that don't want to drive
    /// a real socket. Mirrors this codebase's existing `Request::fake_http` test helper.
    pub fn fake(method: Method, path: &str, headers: Vec<(String, String)>, body: Vec<u8>) -> HttpRequest {
        let host = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("Host"))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| "localhost".to_owned());

        HttpRequest {
            id: Uuid::new_v4(),
            version: "HTTP/1.1".to_owned(),
            method,
            uri: format!("http://{}{}", host, path),
            path: path.to_owned(),
            headers,
            body,
        }
    }

    #[inline]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[inline]
    pub fn method(&self) -> Method {
        self.method
    }

    #[inline]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[inline]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The path component of the request's reconstructed URI, e.g. `/foo/bar`.
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns every value associated with `name`, case-sensitively, in the order received.
    pub fn headers(&self, name: &str) -> impl Iterator<Item = &str> {
        self.headers.iter().filter(move |(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// Returns the first value associated with `name`, matched case-insensitively (as is
    /// conventional for HTTP header *names*, even though this server keeps the keys as received
    /// in `self.headers` for `Request::headers`).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn header_contains_token(&self, name: &str, token: &str) -> bool {
        self.header(name)
            .map(|v| v.split(',').any(|part| part.trim().eq_ignore_ascii_case(token)))
            .unwrap_or(false)
    }

    /// See §3: `Connection` contains `Upgrade`, `Upgrade` contains `websocket`, and
    /// `Sec-WebSocket-Key` is present and non-empty.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.header_contains_token("Connection", "Upgrade")
            && self.header_contains_token("Upgrade", "websocket")
            && self.header("Sec-WebSocket-Key").map(|k| !k.is_empty()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let req = HttpRequest::parse(raw).unwrap();
        assert_eq!(req.method(), Method::Get);
        assert_eq!(req.path(), "/");
        assert_eq!(req.uri(), "http://localhost/");
        assert!(req.body().is_empty());
    }

    #[test]
    fn rejects_missing_host() {
        let raw = b"GET / HTTP/1.1\r\n\r\n";
        assert_eq!(HttpRequest::parse(raw), Err(Malformed));
    }

    #[test]
    fn rejects_duplicate_host() {
        let raw = b"GET / HTTP/1.1\r\nHost: a\r\nHost: b\r\n\r\n";
        assert_eq!(HttpRequest::parse(raw), Err(Malformed));
    }

    #[test]
    fn rejects_header_without_colon() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\nnotaheader\r\n\r\n";
        assert_eq!(HttpRequest::parse(raw), Err(Malformed));
    }

    #[test]
    fn rejects_unknown_method() {
        let raw = b"FOO / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        assert_eq!(HttpRequest::parse(raw), Err(Malformed));
    }

    #[test]
    fn repeated_headers_preserve_order() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\nX-Foo: 1\r\nX-Foo: 2\r\n\r\n";
        let req = HttpRequest::parse(raw).unwrap();
        let values: Vec<_> = req.headers("X-Foo").collect();
        assert_eq!(values, vec!["1", "2"]);
    }

    #[test]
    fn captures_body_bytes() {
        let raw = b"POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello";
        let req = HttpRequest::parse(raw).unwrap();
        assert_eq!(req.body(), b"hello");
    }

    #[test]
    fn detects_websocket_upgrade() {
        let raw = b"GET /ws HTTP/1.1\r\nHost: localhost\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";
        let req = HttpRequest::parse(raw).unwrap();
        assert!(req.is_websocket_upgrade());
    }

    #[test]
    fn fake_request_for_unit_tests() {
        let req = HttpRequest::fake(
            Method::Get,
            "/",
            vec![("Authorization".to_owned(), "Basic AAAA".to_owned())],
            Vec::new(),
        );
        assert_eq!(req.header("Authorization"), Some("Basic AAAA"));
    }
}
