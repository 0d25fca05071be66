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

//! Session data

use std::{
    io::{ErrorKind, Read, Result, Write},
    net::SocketAddr,
    panic::{self, AssertUnwindSafe},
    time::{Duration, Instant},
};

use mio::{net::TcpStream, Interest, Registry, Token};

use crate::{
    codec::{self, DecodeError},
    http::{Headers, Request, Status, Version},
};

use super::{
    writer::{Completion, ResponseWriter},
    Handler,
};

const KB: usize = 1024;
const READ_CHUNK: usize = 16 * KB;

/// How long a connection may take to deliver a request, or sit idle between requests
#[derive(Debug, Clone, Copy)]
pub(crate) struct Timeouts {
    pub(crate) header: Duration,
    pub(crate) body: Duration,
    pub(crate) keep_alive: Duration,
}

/// Contains the connection's `TcpStream` and associated read and write buffers
#[derive(Debug)]
pub(crate) struct Session {
    stream: TcpStream,
    peer: SocketAddr,
    read_buffer: Vec<u8>,
    write_buffer: Vec<u8>,
    // no more requests are read; close once `write_buffer` drains
    closing: bool,
    peer_closed: bool,
    // first byte of the request still being received
    started: Option<Instant>,
    head_received: bool,
    idle_since: Instant,
}

impl Session {
    pub(crate) fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            read_buffer: Vec::with_capacity(READ_CHUNK),
            write_buffer: Vec::new(),
            closing: false,
            peer_closed: false,
            started: None,
            head_received: false,
            idle_since: Instant::now(),
        }
    }

    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Reads everything currently available from the stream into the read buffer.
    pub(crate) fn fill(&mut self) -> Result<usize> {
        let mut read = 0;
        let mut chunk = [0; READ_CHUNK];

        loop {
            match self.stream.read(&mut chunk) {
                // Stream has closed
                Ok(0) => {
                    self.peer_closed = true;
                    return Ok(read);
                }
                Ok(n) => {
                    self.read_buffer.extend_from_slice(&chunk[..n]);
                    read += n;
                }
                Err(e) => match e.kind() {
                    // no more bytes to be read
                    ErrorKind::WouldBlock => return Ok(read),
                    ErrorKind::Interrupted => {}
                    _ => return Err(e),
                },
            }
        }
    }

    /// Flushes any pending write data to the TcpStream
    pub(crate) fn flush(&mut self) -> Result<usize> {
        let mut flushed = 0;

        while !self.write_buffer.is_empty() {
            match self.stream.write(&self.write_buffer) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(amt) => {
                    self.write_buffer.drain(..amt);
                    flushed += amt;
                }
                Err(e) => match e.kind() {
                    ErrorKind::WouldBlock => break,
                    ErrorKind::Interrupted => {}
                    _ => return Err(e),
                },
            }
        }

        Ok(flushed)
    }

    /// Decodes every complete request in the read buffer and hands each to `handler`, in arrival
    /// order.
    pub(crate) fn dispatch(&mut self, handler: &dyn Handler, max_payload: usize) {
        while !self.closing {
            match codec::decode_request(&self.read_buffer, max_payload) {
                Ok(Some((request, consumed))) => {
                    self.read_buffer.drain(..consumed);
                    self.started = None;
                    self.respond(handler, &request);
                }
                Ok(None) => {
                    if self.peer_closed && !self.read_buffer.is_empty() {
                        log::debug!("{} closed mid-request", self.peer);
                        self.closing = true;
                    }
                    break;
                }
                Err(DecodeError::TooLarge { length, limit }) => {
                    log::warn!("{}: refusing {length} byte body (limit {limit})", self.peer);
                    self.refuse(Status::ContentTooLarge);
                }
                Err(e) => {
                    log::warn!("{}: {e}", self.peer);
                    self.refuse(Status::BadRequest);
                }
            }
        }

        if self.peer_closed {
            self.closing = true;
        }

        let now = Instant::now();
        if self.read_buffer.is_empty() {
            self.started = None;
            self.head_received = false;
            self.idle_since = now;
        } else {
            self.started.get_or_insert(now);
            self.head_received = self.read_buffer.windows(4).any(|w| w == b"\r\n\r\n");
        }
    }

    /// When the session times out: the pending request must be complete by then, or, between
    /// requests, the next one must have started.
    pub(crate) fn deadline(&self, timeouts: &Timeouts) -> Option<Instant> {
        if self.closing {
            return None;
        }
        match self.started {
            Some(started) if self.head_received => started.checked_add(timeouts.body),
            Some(started) => started.checked_add(timeouts.header.min(timeouts.body)),
            None => self.idle_since.checked_add(timeouts.keep_alive),
        }
    }

    /// Gives up on the connection. A partially received request is answered with
    /// `408 Request Timeout`; an idle connection is just closed.
    pub(crate) fn time_out(&mut self) {
        if self.started.is_some() {
            log::warn!("{}: request timed out", self.peer);
            self.refuse(Status::RequestTimeout);
        } else {
            log::debug!("{}: idle timeout", self.peer);
            self.closing = true;
        }
    }

    fn respond(&mut self, handler: &dyn Handler, request: &Request) {
        log::trace!("> {} {} from {}", request.method(), request.target(), self.peer);

        let mut writer = ResponseWriter::new(
            request.version(),
            request.keep_alive(),
            &mut self.write_buffer,
        );
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| handler.on_request(request, &mut writer)));
        if outcome.is_err() {
            log::error!(
                "handler panicked on {} {}",
                request.method(),
                request.target()
            );
        }

        match writer.finish() {
            Completion::Sent { keep_alive: true } if outcome.is_ok() => {}
            _ => self.closing = true,
        }
    }

    fn refuse(&mut self, status: Status) {
        codec::encode_response(
            Version::H1_1,
            status,
            &Headers::new(),
            b"",
            false,
            &mut self.write_buffer,
        );
        self.read_buffer.clear();
        self.closing = true;
    }

    /// True once nothing is left to write and no further request will be served
    pub(crate) fn is_done(&self) -> bool {
        self.closing && self.write_buffer.is_empty()
    }

    fn interest(&self) -> Interest {
        if self.write_buffer.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        }
    }

    pub(crate) fn register(&mut self, registry: &Registry, token: Token) -> Result<()> {
        let interest = self.interest();
        registry.register(&mut self.stream, token, interest)
    }

    pub(crate) fn reregister(&mut self, registry: &Registry, token: Token) -> Result<()> {
        let interest = self.interest();
        registry.reregister(&mut self.stream, token, interest)
    }

    pub(crate) fn deregister(&mut self, registry: &Registry) -> Result<()> {
        registry.deregister(&mut self.stream)
    }
}
