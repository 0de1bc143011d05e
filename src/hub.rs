// Copyright (c) 2016 The fixturehall developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The fixed set of observable events a [`crate::server::Server`] exposes (§4.6, §4.7), plus the
//! append-only log buffer described in §6.

use std::sync::Mutex;

use log::debug;
use uuid::Uuid;

use crate::events::ObservableEvent;
use crate::request::HttpRequest;
use crate::response::HttpResponse;

/// Payload of `on_data_received` / `on_data_sent`: the connection and the decoded text (UTF-8
/// decoding of the raw bytes for HTTP, the frame's text payload for WebSocket).
pub type DataEvent = (Uuid, String);

/// Payload of `on_request_handling`: connection id and the request about to be dispatched.
pub type RequestHandlingEvent = (Uuid, HttpRequest);

/// Payload of `on_request_handled`: connection id, the request, and the response it produced.
pub type RequestHandledEvent = (Uuid, HttpRequest, HttpResponse);

/// All events a [`crate::server::Server`] broadcasts, gathered in one struct so accept and
/// connection threads can share a single `Arc` to it.
pub struct ServerEvents {
    pub on_data_received: ObservableEvent<DataEvent>,
    pub on_data_sent: ObservableEvent<DataEvent>,
    pub on_client_connected: ObservableEvent<Uuid>,
    pub on_client_disconnected: ObservableEvent<Uuid>,
    pub on_request_handling: ObservableEvent<RequestHandlingEvent>,
    pub on_request_handled: ObservableEvent<RequestHandledEvent>,
    log_buffer: Mutex<Vec<String>>,
}

impl ServerEvents {
    pub fn new() -> ServerEvents {
        ServerEvents {
            on_data_received: ObservableEvent::unbounded(),
            on_data_sent: ObservableEvent::unbounded(),
            on_client_connected: ObservableEvent::unbounded(),
            on_client_disconnected: ObservableEvent::unbounded(),
            on_request_handling: ObservableEvent::unbounded(),
            on_request_handled: ObservableEvent::unbounded(),
            log_buffer: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn client_connected(&self, id: Uuid) {
        self.on_client_connected.notify(id);
    }

    pub(crate) fn client_disconnected(&self, id: Uuid) {
        self.on_client_disconnected.notify(id);
    }

    pub(crate) fn data_received(&self, id: Uuid, text: String) {
        self.on_data_received.notify((id, text));
    }

    pub(crate) fn data_sent(&self, id: Uuid, text: String) {
        self.on_data_sent.notify((id, text));
    }

    pub(crate) fn request_handling(&self, id: Uuid, request: HttpRequest) {
        self.on_request_handling.notify((id, request));
    }

    pub(crate) fn request_handled(&self, id: Uuid, request: HttpRequest, response: HttpResponse) {
        self.on_request_handled.notify((id, request, response));
    }

    /// Appends to the queryable log buffer (§6's `log`) and mirrors it to the `log` facade at
    /// debug level — this is wire-level chatter (bytes sent/received, connect/disconnect), not
    /// something an embedder needs at `info!`.
    pub(crate) fn log_message(&self, message: String) {
        debug!("{}", message);
        self.log_buffer.lock().unwrap().push(message);
    }

    /// A snapshot of the append-only log buffer accumulated since the server started.
    pub fn log(&self) -> Vec<String> {
        self.log_buffer.lock().unwrap().clone()
    }
}

impl Default for ServerEvents {
    fn default() -> ServerEvents {
        ServerEvents::new()
    }
}
