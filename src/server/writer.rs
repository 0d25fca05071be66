// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Write-once response sink handed to handlers

use crate::{
    codec,
    error::{Result, Violation},
    http::{Headers, Status, Version},
};

/// Sink through which a [`Handler`](super::Handler) answers exactly one request.
///
/// The writer borrows the connection's output buffer for the duration of the handler call, so it
/// cannot outlive the dispatch that created it. Calling [`send`](Self::send) a second time is
/// refused with [`Violation::DoubleSend`]; returning without sending makes the endpoint answer
/// with `500 Internal Server Error` on the handler's behalf.
#[derive(Debug)]
pub struct ResponseWriter<'a> {
    version: Version,
    keep_alive: bool,
    headers: Headers,
    out: &'a mut Vec<u8>,
    sends: usize,
}

/// What the dispatcher should do with the connection once the handler returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    /// Exactly one response was written
    Sent { keep_alive: bool },
    /// The handler broke the send-once contract; the connection must be closed
    Violated,
}

impl<'a> ResponseWriter<'a> {
    pub(crate) fn new(version: Version, keep_alive: bool, out: &'a mut Vec<u8>) -> Self {
        Self {
            version,
            keep_alive,
            headers: Headers::new(),
            out,
            sends: 0,
        }
    }

    /// Headers written with the response. `Content-Length` and `Connection` are managed by the
    /// endpoint and ignored here, except that `Connection: close` closes the connection after
    /// the response.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Appends a response header
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.append(name, value);
        self
    }

    /// Whether a response has already been sent
    pub fn is_sent(&self) -> bool {
        self.sends > 0
    }

    /// Sends the response. This is the terminal operation of the writer.
    pub fn send(&mut self, status: Status, body: impl AsRef<[u8]>) -> Result<()> {
        self.sends += 1;
        if self.sends > 1 {
            log::error!("{}", Violation::DoubleSend);
            return Err(Violation::DoubleSend.into());
        }

        if self.headers.wants_close() {
            self.keep_alive = false;
        }

        log::trace!("< {} {}", status.as_u16(), status.reason());
        codec::encode_response(
            self.version,
            status,
            &self.headers,
            body.as_ref(),
            self.keep_alive,
            self.out,
        );
        Ok(())
    }

    /// Closes out the dispatch, substituting an error response if the handler sent nothing.
    pub(crate) fn finish(self) -> Completion {
        match self.sends {
            0 => {
                log::error!("{}", Violation::SendOmitted);
                codec::encode_response(
                    self.version,
                    Status::InternalServerError,
                    &Headers::new(),
                    b"",
                    false,
                    self.out,
                );
                Completion::Violated
            }
            1 => Completion::Sent {
                keep_alive: self.keep_alive,
            },
            _ => Completion::Violated,
        }
    }
}
