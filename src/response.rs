// Copyright (c) 2016 The fixturehall developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Builds and serializes the HTTP/1.1 response that goes back over the wire.

use chrono::Utc;
use uuid::Uuid;

use crate::request::HeaderList;

/// Reason phrases for the status codes this server actually produces. Anything else serializes
/// with an empty reason phrase (trailing whitespace trimmed from the status line).
fn reason_phrase(status_code: u16) -> Option<&'static str> {
    Some(match status_code {
        101 => "Switching Protocols",
        200 => "OK",
        301 => "Moved Permanently",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => return None,
    })
}

/// A mutable response builder. Handlers (`handler::Handler::handle`) build one of these and
/// hand it back to the dispatcher, which serializes it to bytes.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Identifier of the request this response answers, for log/event correlation.
    request_id: Uuid,
    status_code: u16,
    version: String,
    headers: HeaderList,
    body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(request_id: Uuid, status_code: u16) -> HttpResponse {
        HttpResponse {
            request_id,
            status_code,
            version: "HTTP/1.1".to_owned(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    #[inline]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    #[inline]
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn with_status_code(mut self, code: u16) -> HttpResponse {
        self.status_code = code;
        self
    }

    pub fn with_body<D: Into<Vec<u8>>>(mut self, body: D) -> HttpResponse {
        self.body = body.into();
        self
    }

    /// Appends a header value. Repeated calls with the same `name` produce repeated header
    /// lines, matching `HttpRequest`'s multi-valued header model.
    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> HttpResponse {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replaces every existing value of `name` with a single new value.
    pub fn set_header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> HttpResponse {
        let name = name.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Applies the set of default headers every handled request gets: `Connection: keep-alive`,
    /// `Server`, `Date`, `Content-Type`, and `Content-Length` (computed from the body that has
    /// already been set). Handlers call this once and may override individual headers
    /// afterwards (the upgrade handler overrides `Connection`, for instance).
    pub fn with_standard_decoration(self, product: &str, mime: &str) -> HttpResponse {
        let body_len = self.body.len();
        self.set_header("Connection", "keep-alive")
            .set_header("Server", product.to_owned())
            .set_header("Date", http_date_now())
            .set_header("Content-Type", mime.to_owned())
            .set_header("Content-Length", body_len.to_string())
    }

    /// Serializes the status line, headers, separator, and body to wire bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.body.len());

        match reason_phrase(self.status_code) {
            Some(phrase) => {
                out.extend_from_slice(format!("{} {} {}\r\n", self.version, self.status_code, phrase).as_bytes());
            }
            None => {
                out.extend_from_slice(format!("{} {}", self.version, self.status_code).trim_end().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
        }

        for (key, value) in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
        }

        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

/// `ddd, dd MMM yyyy HH:mm:ss GMT`, per RFC 1123, in UTC — as used by the `Date` header.
fn http_date_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid() -> Uuid {
        Uuid::new_v4()
    }

    #[test]
    fn serializes_known_status_with_reason_phrase() {
        let resp = HttpResponse::new(rid(), 404).with_body(Vec::from(&b"nope"[..]));
        let bytes = resp.serialize();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.ends_with("nope"));
    }

    #[test]
    fn serializes_unknown_status_without_reason_phrase() {
        let resp = HttpResponse::new(rid(), 799);
        let text = String::from_utf8(resp.serialize()).unwrap();
        assert!(text.starts_with("HTTP/1.1 799\r\n"));
    }

    #[test]
    fn standard_decoration_sets_content_length() {
        let resp = HttpResponse::new(rid(), 200)
            .with_body(Vec::from(&b"hello world"[..]))
            .with_standard_decoration("fixturehall/0.1", "text/plain");
        assert_eq!(resp.header("Content-Length"), Some("11"));
        assert_eq!(resp.header("Connection"), Some("keep-alive"));
        assert_eq!(resp.header("Content-Type"), Some("text/plain"));
    }

    #[test]
    fn repeated_headers_serialize_as_repeated_lines() {
        let resp = HttpResponse::new(rid(), 200)
            .with_header("X-Foo", "1")
            .with_header("X-Foo", "2");
        let text = String::from_utf8(resp.serialize()).unwrap();
        assert_eq!(text.matches("X-Foo:").count(), 2);
    }
}
