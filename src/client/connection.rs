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

//! Outgoing connections and the requests travelling over them

use std::{
    io::{ErrorKind, Read, Result, Write},
    time::{Duration, Instant},
};

use mio::{net::TcpStream, Interest, Registry, Token};

use crate::{
    codec::{self, DecodeError},
    error::Error,
    http::{Method, Request, Response},
    promise::Resolver,
};

const READ_CHUNK: usize = 16 * 1024;

/// A request waiting for, or travelling over, a connection
#[derive(Debug)]
pub(crate) struct Exchange {
    pub(crate) request: Request,
    pub(crate) authority: String,
    pub(crate) timeout: Duration,
    pub(crate) deadline: Instant,
    pub(crate) resolver: Resolver<Response>,
    pub(crate) retried: bool,
}

impl Exchange {
    pub(crate) fn resolve(self, response: Response) {
        log::trace!(
            "< {} {} from {}",
            response.status().as_u16(),
            self.request.target(),
            self.authority
        );
        // each exchange owns the only resolver of its promise
        let _ = self.resolver.resolve(response);
    }

    pub(crate) fn reject(self, error: Error) {
        log::debug!(
            "{} {} to {} failed: {error}",
            self.request.method(),
            self.request.target(),
            self.authority
        );
        let _ = self.resolver.reject(error);
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.deadline <= now
    }
}

impl Drop for Exchange {
    // an exchange lost without an answer, e.g. to a dying io thread, still settles its promise
    fn drop(&mut self) {
        if self.resolver.is_pending() {
            log::error!(
                "{} {} to {} abandoned",
                self.request.method(),
                self.request.target(),
                self.authority
            );
            let _ = self.resolver.reject(Error::Shutdown);
        }
    }
}

/// One TCP connection to a host, carrying at most one exchange at a time
#[derive(Debug)]
pub(crate) struct Connection {
    stream: TcpStream,
    authority: String,
    connected: bool,
    exchange: Option<Exchange>,
    read_buffer: Vec<u8>,
    write_buffer: Vec<u8>,
    eof: bool,
    served: usize,
}

impl Connection {
    pub(crate) fn new(stream: TcpStream, authority: String) -> Self {
        Self {
            stream,
            authority,
            connected: false,
            exchange: None,
            read_buffer: Vec::new(),
            write_buffer: Vec::new(),
            eof: false,
            served: 0,
        }
    }

    pub(crate) fn authority(&self) -> &str {
        &self.authority
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.exchange.is_some()
    }

    pub(crate) fn is_eof(&self) -> bool {
        self.eof
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.exchange.as_ref().map(|e| e.deadline)
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.exchange.as_ref().map(|e| e.timeout)
    }

    /// Whether the exchange may be replayed on a fresh connection: the connection was reused
    /// from the pool and the server closed it without answering a single byte.
    pub(crate) fn is_stale(&self) -> bool {
        self.served > 0
            && self.read_buffer.is_empty()
            && self.exchange.as_ref().is_some_and(|e| !e.retried)
    }

    pub(crate) fn take_exchange(&mut self) -> Option<Exchange> {
        self.exchange.take()
    }

    /// Completes a non-blocking connect. `Ok(false)` means the handshake is still in progress.
    pub(crate) fn finish_connect(&mut self) -> Result<bool> {
        if let Some(e) = self.stream.take_error()? {
            return Err(e);
        }

        match self.stream.peer_addr() {
            Ok(_) => {
                self.connected = true;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Serializes `exchange`'s request into the write buffer.
    pub(crate) fn start(&mut self, exchange: Exchange, keep_alive: bool) {
        log::trace!(
            "> {} {} to {}",
            exchange.request.method(),
            exchange.request.target(),
            self.authority
        );
        codec::encode_request(
            &exchange.request,
            &self.authority,
            keep_alive,
            &mut self.write_buffer,
        );
        self.exchange = Some(exchange);
    }

    /// Fills the read buffer with everything currently available
    pub(crate) fn fill(&mut self) -> Result<usize> {
        let mut read = 0;
        let mut chunk = [0; READ_CHUNK];

        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(read);
                }
                Ok(n) => {
                    self.read_buffer.extend_from_slice(&chunk[..n]);
                    read += n;
                }
                Err(e) => match e.kind() {
                    ErrorKind::WouldBlock => return Ok(read),
                    ErrorKind::Interrupted => {}
                    _ => return Err(e),
                },
            }
        }
    }

    /// Writes as much of the pending request as the socket accepts
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

    /// Decodes the response to the current exchange, if it has fully arrived.
    pub(crate) fn poll_response(&mut self) -> std::result::Result<Option<Response>, DecodeError> {
        let head = self
            .exchange
            .as_ref()
            .is_some_and(|e| e.request.method() == Method::Head);

        match codec::decode_response(&self.read_buffer, head, self.eof)? {
            Some((response, consumed)) => {
                self.read_buffer.drain(..consumed);
                self.served += 1;
                Ok(Some(response))
            }
            None => Ok(None),
        }
    }

    /// True if bytes arrived that no request asked for
    pub(crate) fn has_unsolicited_data(&self) -> bool {
        !self.read_buffer.is_empty()
    }

    fn interest(&self) -> Interest {
        if !self.connected || !self.write_buffer.is_empty() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
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

#[cfg(test)]
mod test {
    use super::*;
    use crate::promise::Promise;

    fn pending_exchange() -> (Promise<Response>, Exchange) {
        let (promise, resolver) = Promise::pending();
        let exchange = Exchange {
            request: Request::new(Method::Get, "/"),
            authority: String::from("127.0.0.1:80"),
            timeout: Duration::from_secs(1),
            deadline: Instant::now() + Duration::from_secs(1),
            resolver,
            retried: false,
        };
        (promise, exchange)
    }

    #[test]
    fn dropped_exchange_rejects_its_promise() {
        let (promise, exchange) = pending_exchange();
        drop(exchange);
        assert!(matches!(promise.error(), Some(Error::Shutdown)));
    }

    #[test]
    fn answered_exchange_keeps_its_outcome() {
        let (promise, exchange) = pending_exchange();
        exchange.resolve(Response::new(crate::http::Status::r#Ok));
        assert!(promise.is_fulfilled());

        let (promise, exchange) = pending_exchange();
        exchange.reject(Error::rejected("gone"));
        assert!(matches!(promise.error(), Some(Error::Rejected(_))));
    }
}
