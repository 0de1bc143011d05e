// Copyright (c) 2016 The fixturehall developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use quick_error::quick_error;

quick_error! {
    /// Programmer-misuse errors surfaced directly to the embedder.
    ///
    /// Wire-level problems (a malformed request, an unknown route, a missing authenticator
    /// match) are never represented here: the server resolves those itself into a canned HTTP
    /// response. This type only covers calls into the public API that the embedder got wrong.
    #[derive(Debug)]
    pub enum ServerError {
        /// `send_data`, `disconnect` or `ignore_close_connection_request` was called with a
        /// connection identifier that isn't currently active.
        UnknownConnection(id: String) {
            display("no active connection with id {}", id)
        }
        /// The buffer size was changed after the server started listening.
        ConfigurationError(message: String) {
            display("{}", message)
        }
        /// An observer was registered on an event that already has `max_observer_count`
        /// handlers attached.
        CapacityExceeded(max: usize) {
            display("This observable event only allows {} handler{}.", max, if *max == 1 { "" } else { "s" })
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
