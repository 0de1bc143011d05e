// Copyright (c) 2016 The fixturehall developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The accept loop and embedder-facing API (§4.6).

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use log::info;
use uuid::Uuid;

use crate::connection::{self, ConnectionHandle, ConnectionState};
use crate::error::{ServerError, ServerResult};
use crate::events::{DispatchMode, ObserverToken};
use crate::handler::Handler;
use crate::hub::ServerEvents;
use crate::registry::Registry;
use crate::request::Method;
use crate::websocket::frame;

/// Pre-start configuration for a [`Server`] (§4.10): bind port, initial read-buffer size, and
/// the product name/version advertised in the `Server` response header.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    port: u16,
    buffer_size: usize,
    product_name: String,
    product_version: String,
}

impl ServerConfig {
    pub fn new(port: u16) -> ServerConfig {
        ServerConfig {
            port,
            buffer_size: 8192,
            product_name: "fixturehall".to_owned(),
            product_version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> ServerConfig {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_product_name<N: Into<String>, V: Into<String>>(mut self, name: N, version: V) -> ServerConfig {
        self.product_name = name.into();
        self.product_version = version.into();
        self
    }

    fn product_header(&self) -> String {
        format!("{}/{}", self.product_name, self.product_version)
    }
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig::new(0)
    }
}

type ConnectionMap = Arc<RwLock<HashMap<Uuid, Arc<ConnectionHandle>>>>;

/// The in-memory HTTP/1.1 and WebSocket test-fixture server (§4.6).
pub struct Server {
    config: RwLock<ServerConfig>,
    started: AtomicBool,
    bound_port: AtomicU16,
    local_addr: Mutex<Option<SocketAddr>>,
    accepting: Arc<AtomicBool>,
    registry: Arc<Registry>,
    connections: ConnectionMap,
    events: Arc<ServerEvents>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Server {
        Server {
            config: RwLock::new(config),
            started: AtomicBool::new(false),
            bound_port: AtomicU16::new(0),
            local_addr: Mutex::new(None),
            accepting: Arc::new(AtomicBool::new(false)),
            registry: Arc::new(Registry::new()),
            connections: Arc::new(RwLock::new(HashMap::new())),
            events: Arc::new(ServerEvents::new()),
            accept_handle: Mutex::new(None),
        }
    }

    /// The bound port; `0` until `start()` has successfully bound a listener.
    pub fn port(&self) -> u16 {
        self.bound_port.load(Ordering::SeqCst)
    }

    /// The current read-buffer size (§4.10's `bufferSize` property).
    pub fn buffer_size(&self) -> usize {
        self.config.read().unwrap().buffer_size
    }

    /// Fails with [`ServerError::ConfigurationError`] once the server has started (§4.6, §4.10).
    pub fn set_buffer_size(&self, buffer_size: usize) -> ServerResult<()> {
        if self.started.load(Ordering::SeqCst) {
            return Err(ServerError::ConfigurationError(
                "buffer size cannot be changed after the server has started".to_owned(),
            ));
        }
        self.config.write().unwrap().buffer_size = buffer_size;
        Ok(())
    }

    /// `registerHandler(path, handler)` ≡ `register(path, GET, handler)` (§4.3).
    pub fn register_handler(&self, path: &str, handler: Handler) {
        self.registry.register_get(path, handler);
    }

    pub fn register_handler_for_method(&self, path: &str, method: Method, handler: Handler) {
        self.registry.register(path, method, handler);
    }

    /// Binds `127.0.0.1:<port>` (`0` picks an OS-assigned port) and starts the accept loop on its
    /// own thread.
    pub fn start(&self) -> ServerResult<()> {
        let config = self.config.read().unwrap().clone();
        let listener = TcpListener::bind(("127.0.0.1", config.port))
            .map_err(|e| ServerError::ConfigurationError(format!("failed to bind 127.0.0.1:{}: {}", config.port, e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::ConfigurationError(e.to_string()))?;

        self.bound_port.store(addr.port(), Ordering::SeqCst);
        *self.local_addr.lock().unwrap() = Some(addr);
        self.accepting.store(true, Ordering::SeqCst);
        self.started.store(true, Ordering::SeqCst);

        let registry = self.registry.clone();
        let connections = self.connections.clone();
        let events = self.events.clone();
        let accepting = self.accepting.clone();
        let product = config.product_header();
        let buffer_size = config.buffer_size;

        let handle = thread::spawn(move || {
            for incoming in listener.incoming() {
                if !accepting.load(Ordering::SeqCst) {
                    break;
                }
                let stream = match incoming {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                accept_connection(stream, &registry, &connections, &events, &product, buffer_size);
            }
        });

        *self.accept_handle.lock().unwrap() = Some(handle);
        info!("listening on {}", addr);
        Ok(())
    }

    /// Stops accepting new connections, disconnects every active one, and joins the accept
    /// thread.
    pub fn stop(&self) {
        self.accepting.store(false, Ordering::SeqCst);

        // `TcpListener::incoming()` blocks; a harmless local connect is the standard way to wake
        // it up so the accept thread notices `accepting` has flipped and exits promptly.
        if let Some(addr) = *self.local_addr.lock().unwrap() {
            let _ = TcpStream::connect(addr);
        }

        if let Some(handle) = self.accept_handle.lock().unwrap().take() {
            let _ = handle.join();
        }

        for (_, conn) in self.connections.write().unwrap().drain() {
            let _ = conn.disconnect();
        }

        self.started.store(false, Ordering::SeqCst);
        info!("server stopped");
    }

    /// Encodes `text` as a WebSocket Text frame and writes it to the connection (§4.6).
    pub fn send_data(&self, connection_id: Uuid, text: &str) -> ServerResult<()> {
        let conn = self.lookup(connection_id)?;
        conn.send_raw(&frame::encode_text(text))
            .map_err(|e| ServerError::ConfigurationError(e.to_string()))?;
        self.events.data_sent(connection_id, text.to_owned());
        Ok(())
    }

    pub fn disconnect(&self, connection_id: Uuid) -> ServerResult<()> {
        let conn = self.lookup(connection_id)?;
        conn.disconnect().map_err(|e| ServerError::ConfigurationError(e.to_string()))
    }

    pub fn ignore_close_connection_request(&self, connection_id: Uuid, ignore: bool) -> ServerResult<()> {
        let conn = self.lookup(connection_id)?;
        conn.set_ignore_close_request(ignore);
        Ok(())
    }

    /// The connection's state, mainly useful from tests driving scenario 6 of §8.
    pub fn connection_state(&self, connection_id: Uuid) -> ServerResult<ConnectionState> {
        Ok(self.lookup(connection_id)?.state())
    }

    fn lookup(&self, connection_id: Uuid) -> ServerResult<Arc<ConnectionHandle>> {
        self.connections
            .read()
            .unwrap()
            .get(&connection_id)
            .cloned()
            .ok_or_else(|| ServerError::UnknownConnection(connection_id.to_string()))
    }

    /// A snapshot of the append-only log (§6).
    pub fn log(&self) -> Vec<String> {
        self.events.log()
    }

    pub fn on_data_received<F>(&self, handler: F, mode: DispatchMode) -> ServerResult<ObserverToken>
    where
        F: Fn((Uuid, String)) + Send + Sync + 'static,
    {
        self.events.on_data_received.add_observer(handler, mode, None)
    }

    pub fn on_data_sent<F>(&self, handler: F, mode: DispatchMode) -> ServerResult<ObserverToken>
    where
        F: Fn((Uuid, String)) + Send + Sync + 'static,
    {
        self.events.on_data_sent.add_observer(handler, mode, None)
    }

    pub fn on_client_connected<F>(&self, handler: F, mode: DispatchMode) -> ServerResult<ObserverToken>
    where
        F: Fn(Uuid) + Send + Sync + 'static,
    {
        self.events.on_client_connected.add_observer(handler, mode, None)
    }

    pub fn on_client_disconnected<F>(&self, handler: F, mode: DispatchMode) -> ServerResult<ObserverToken>
    where
        F: Fn(Uuid) + Send + Sync + 'static,
    {
        self.events.on_client_disconnected.add_observer(handler, mode, None)
    }

    pub fn on_request_handling<F>(&self, handler: F, mode: DispatchMode) -> ServerResult<ObserverToken>
    where
        F: Fn((Uuid, crate::request::HttpRequest)) + Send + Sync + 'static,
    {
        self.events.on_request_handling.add_observer(handler, mode, None)
    }

    pub fn on_request_handled<F>(&self, handler: F, mode: DispatchMode) -> ServerResult<ObserverToken>
    where
        F: Fn((Uuid, crate::request::HttpRequest, crate::response::HttpResponse)) + Send + Sync + 'static,
    {
        self.events.on_request_handled.add_observer(handler, mode, None)
    }
}

fn accept_connection(
    stream: TcpStream,
    registry: &Arc<Registry>,
    connections: &ConnectionMap,
    events: &Arc<ServerEvents>,
    product: &str,
    buffer_size: usize,
) {
    let id = Uuid::new_v4();
    let writer = match stream.try_clone() {
        Ok(w) => w,
        Err(_) => return,
    };

    let state = Arc::new(AtomicU8::new(ConnectionState::Http as u8));
    let ignore_close_request = Arc::new(AtomicBool::new(false));
    let handle = Arc::new(ConnectionHandle::new(id, writer, state.clone(), ignore_close_request.clone()));
    connections.write().unwrap().insert(id, handle);

    let registry = registry.clone();
    let connections = connections.clone();
    let events = events.clone();
    let product = product.to_owned();

    thread::spawn(move || {
        connection::run(id, stream, registry, product, buffer_size, state, ignore_close_request, events);
        connections.write().unwrap().remove(&id);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read as _, Write as _};
    use std::net::TcpStream as ClientStream;
    use std::time::Duration;

    #[test]
    fn binds_to_os_assigned_port_when_given_zero() {
        let server = Server::new(ServerConfig::default());
        server.start().unwrap();
        assert_ne!(server.port(), 0);
        server.stop();
    }

    #[test]
    fn unknown_connection_operations_fail() {
        let server = Server::new(ServerConfig::default());
        server.start().unwrap();
        let bogus = Uuid::new_v4();
        assert!(matches!(server.disconnect(bogus), Err(ServerError::UnknownConnection(_))));
        assert!(matches!(server.send_data(bogus, "hi"), Err(ServerError::UnknownConnection(_))));
        server.stop();
    }

    #[test]
    fn buffer_size_cannot_change_after_start() {
        let server = Server::new(ServerConfig::default());
        server.start().unwrap();
        assert!(matches!(server.set_buffer_size(1024), Err(ServerError::ConfigurationError(_))));
        server.stop();
    }

    #[test]
    fn buffer_size_getter_reflects_setter() {
        let server = Server::new(ServerConfig::default());
        assert_eq!(server.buffer_size(), 8192);
        server.set_buffer_size(4096).unwrap();
        assert_eq!(server.buffer_size(), 4096);
    }

    #[test]
    fn serves_a_registered_resource_end_to_end() {
        let server = Server::new(ServerConfig::default());
        server.register_handler("/", Handler::resource("hello world"));
        server.start().unwrap();

        let mut client = ClientStream::connect(("127.0.0.1", server.port())).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        client.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();

        let mut buf = [0u8; 1024];
        let n = client.read(&mut buf).unwrap();
        let response = String::from_utf8_lossy(&buf[..n]);
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("hello world"));

        server.stop();
    }
}
