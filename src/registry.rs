// Copyright (c) 2016 The fixturehall developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Maps `(path, method)` to a [`Handler`] and dispatches incoming requests (§4.3).

use std::collections::HashMap;
use std::sync::RwLock;

use crate::handler::Handler;
use crate::request::{HttpRequest, Malformed, Method};
use crate::response::HttpResponse;

/// Registered routes. Concurrent reads (dispatch) are safe while writes (`register`) are rare
/// and expected to happen before traffic starts; protected by a `RwLock` rather than left
/// undocumented-unsafe, per the Open Question resolution in SPEC_FULL.md §9.
#[derive(Default)]
pub struct Registry {
    routes: RwLock<HashMap<String, HashMap<Method, Handler>>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Registers `handler` for `(path, method)`. A later call for the same pair replaces the
    /// earlier registration.
    pub fn register(&self, path: &str, method: Method, handler: Handler) {
        let mut routes = self.routes.write().unwrap();
        routes.entry(path.to_owned()).or_insert_with(HashMap::new).insert(method, handler);
    }

    /// Shorthand for `register(path, Method::Get, handler)`.
    pub fn register_get(&self, path: &str, handler: Handler) {
        self.register(path, Method::Get, handler);
    }

    /// Runs the dispatch decision tree of §4.3 against the current registry snapshot.
    pub fn dispatch(&self, request: Result<&HttpRequest, &Malformed>, product: &str) -> (HttpResponse, Option<&'static str>) {
        let request = match request {
            Err(_) => return (crate::handler::bad_request_for_malformed(product), Some("bad_request")),
            Ok(r) => r,
        };

        if request.is_websocket_upgrade() {
            return (Handler::Upgrade.handle(request, product), Some("upgrade"));
        }

        let routes = self.routes.read().unwrap();
        let methods = match routes.get(request.path()) {
            None => return (Handler::NotFound.handle(request, product), Some("not_found")),
            Some(m) => m,
        };

        match methods.get(&request.method()) {
            Some(handler) => (handler.handle(request, product), None),
            None => {
                let allowed: Vec<Method> = methods.keys().copied().collect();
                (Handler::method_not_allowed(allowed).handle(request, product), Some("method_not_allowed"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRODUCT: &str = "fixturehall/0.1";

    #[test]
    fn dispatches_to_registered_handler() {
        let registry = Registry::new();
        registry.register_get("/", Handler::resource("hello world"));

        let request = HttpRequest::fake(Method::Get, "/", vec![("Host".to_owned(), "localhost".to_owned())], Vec::new());
        let (resp, _) = registry.dispatch(Ok(&request), PRODUCT);
        assert_eq!(resp.status_code(), 200);
        assert_eq!(resp.body(), b"hello world");
    }

    #[test]
    fn unknown_path_is_404() {
        let registry = Registry::new();
        let request = HttpRequest::fake(Method::Get, "/missing", vec![("Host".to_owned(), "localhost".to_owned())], Vec::new());
        let (resp, _) = registry.dispatch(Ok(&request), PRODUCT);
        assert_eq!(resp.status_code(), 404);
        assert!(String::from_utf8_lossy(resp.body()).contains("404 Not Found"));
    }

    #[test]
    fn wrong_method_is_405_with_sorted_allow() {
        let registry = Registry::new();
        registry.register("/", Method::Post, Handler::resource("post"));
        registry.register("/", Method::Delete, Handler::resource("delete"));

        let request = HttpRequest::fake(Method::Get, "/", vec![("Host".to_owned(), "localhost".to_owned())], Vec::new());
        let (resp, _) = registry.dispatch(Ok(&request), PRODUCT);
        assert_eq!(resp.status_code(), 405);
        assert_eq!(resp.header("Allow"), Some("DELETE, POST"));
    }

    #[test]
    fn malformed_request_is_400() {
        let registry = Registry::new();
        let (resp, _) = registry.dispatch(Err(&Malformed), PRODUCT);
        assert_eq!(resp.status_code(), 400);
    }

    #[test]
    fn upgrade_request_bypasses_registry() {
        let registry = Registry::new();
        let request = HttpRequest::fake(
            Method::Get,
            "/ws",
            vec![
                ("Host".to_owned(), "localhost".to_owned()),
                ("Connection".to_owned(), "Upgrade".to_owned()),
                ("Upgrade".to_owned(), "websocket".to_owned()),
                ("Sec-WebSocket-Key".to_owned(), "dGhlIHNhbXBsZSBub25jZQ==".to_owned()),
            ],
            Vec::new(),
        );
        let (resp, _) = registry.dispatch(Ok(&request), PRODUCT);
        assert_eq!(resp.status_code(), 101);
    }
}
