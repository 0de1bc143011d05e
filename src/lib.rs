// Copyright (c) 2016 The fixturehall developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! An in-memory HTTP/1.1 and WebSocket server for driving real client libraries against a
//! loopback fixture in tests.
//!
//! A test registers handlers for `(path, method)` pairs on a [`Server`], starts it on an
//! OS-assigned port, and drives a real client (an HTTP library, a browser, a WebSocket client)
//! against it. Unlike a production server, this one exposes the plumbing a test sometimes needs
//! to poke directly: sending a raw WebSocket frame on demand, refusing to answer a client-
//! initiated close handshake, or reading back the append-only wire log.
//!
//! ```no_run
//! use fixturehall::{Handler, Server, ServerConfig};
//!
//! let server = Server::new(ServerConfig::default());
//! server.register_handler("/", Handler::resource("hello world"));
//! server.start().unwrap();
//! println!("listening on 127.0.0.1:{}", server.port());
//! server.stop();
//! ```

mod auth;
mod connection;
mod error;
mod events;
mod handler;
mod hub;
mod registry;
mod request;
mod response;
mod server;
mod websocket;

pub use auth::{Authenticator, Basic};
pub use connection::ConnectionState;
pub use error::{ServerError, ServerResult};
pub use events::{DispatchMode, ObservableEvent, ObserverToken};
pub use handler::Handler;
pub use request::{HttpRequest, Method};
pub use response::HttpResponse;
pub use server::{Server, ServerConfig};
pub use websocket::frame::{self, DecodeError, Frame, Opcode};
