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

//! The client's I/O threads.
//!
//! A reactor owns a `Poll`, the connections it opened and one pool per host. Requests reach it
//! through a channel, followed by a wake-up. Every promise a reactor holds is settled on its
//! thread, so continuations attached to client responses run there too.

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    io::{self, ErrorKind},
    net::SocketAddr,
    sync::mpsc::{Receiver, TryRecvError},
    time::Instant,
};

use mio::{event::Event, Events, Poll, Token};
use slab::Slab;

use super::connection::{Connection, Exchange};
use crate::{
    error::{Error, Violation},
    http::Response,
    net,
};

pub(crate) const WAKE_TOKEN: Token = Token(usize::MAX);

/// Messages from the [`Client`](super::Client) to one of its reactors
#[derive(Debug)]
pub(crate) enum Command {
    Submit(Exchange),
    Shutdown,
}

/// Connections to a single host
#[derive(Debug)]
struct Pool {
    addr: SocketAddr,
    // connecting, busy and idle alike
    open: usize,
    idle: Vec<Token>,
    queue: VecDeque<Exchange>,
}

pub(crate) struct Reactor {
    id: usize,
    poll: Poll,
    commands: Receiver<Command>,
    connections: Slab<Connection>,
    pools: HashMap<String, Pool>,
    max_connections_per_host: usize,
    keep_alive: bool,
    stopping: bool,
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("id", &self.id)
            .field("connections", &self.connections.len())
            .field("hosts", &self.pools.len())
            .finish()
    }
}

impl Reactor {
    pub(crate) fn new(
        id: usize,
        poll: Poll,
        commands: Receiver<Command>,
        max_connections_per_host: usize,
        keep_alive: bool,
    ) -> Self {
        Self {
            id,
            poll,
            commands,
            connections: Slab::with_capacity(16),
            pools: HashMap::new(),
            max_connections_per_host,
            keep_alive,
            stopping: false,
        }
    }

    /// Main event loop. Returns once a shutdown command arrives or the client is gone.
    pub(crate) fn run(&mut self) {
        let mut events = Events::with_capacity(256);
        log::debug!("io thread {} started", self.id);

        while !self.stopping {
            let timeout = self
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()));

            if let Err(err) = self.poll.poll(&mut events, timeout) {
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                log::error!("io thread {}: failed to poll for events: {err}", self.id);
                break;
            }

            for event in events.iter() {
                match event.token() {
                    WAKE_TOKEN => self.receive(),
                    token => self.connection_event(token, event),
                }
            }

            self.expire(Instant::now());
        }

        self.abort();
        log::debug!("io thread {} stopped", self.id);
    }

    fn receive(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(Command::Submit(exchange)) => self.submit(exchange),
                Ok(Command::Shutdown) | Err(TryRecvError::Disconnected) => {
                    self.stopping = true;
                    return;
                }
                Err(TryRecvError::Empty) => return,
            }
        }
    }

    fn submit(&mut self, exchange: Exchange) {
        let authority = exchange.authority.clone();
        if !self.pools.contains_key(&authority) {
            match net::resolve(authority.as_str()) {
                Ok(addr) => {
                    self.pools.insert(
                        authority.clone(),
                        Pool {
                            addr,
                            open: 0,
                            idle: Vec::new(),
                            queue: VecDeque::new(),
                        },
                    );
                }
                Err(e) => {
                    log::warn!("io thread {}: could not resolve {authority}: {e}", self.id);
                    return exchange.reject(e.into());
                }
            }
        }

        if let Some(pool) = self.pools.get_mut(&authority) {
            pool.queue.push_back(exchange);
        }
        self.pump(&authority);
    }

    /// Hands queued exchanges for `authority` to idle connections, opening new ones while the
    /// host is below its connection cap.
    fn pump(&mut self, authority: &str) {
        loop {
            let (exchange, idle, addr) = {
                let Some(pool) = self.pools.get_mut(authority) else {
                    return;
                };
                if pool.queue.is_empty() {
                    return;
                }
                if let Some(token) = pool.idle.pop() {
                    (pool.queue.pop_front(), Some(token), pool.addr)
                } else if pool.open < self.max_connections_per_host {
                    pool.open += 1;
                    (pool.queue.pop_front(), None, pool.addr)
                } else {
                    return;
                }
            };
            let Some(exchange) = exchange else {
                return;
            };

            match idle {
                Some(token) => self.assign(token, exchange),
                None => match self.open(addr, authority) {
                    Ok(token) => self.assign(token, exchange),
                    Err(e) => {
                        log::warn!("io thread {}: connect to {authority} failed: {e}", self.id);
                        if let Some(pool) = self.pools.get_mut(authority) {
                            pool.open -= 1;
                        }
                        exchange.reject(e.into());
                    }
                },
            }
        }
    }

    fn open(&mut self, addr: SocketAddr, authority: &str) -> io::Result<Token> {
        let stream = net::connect(addr)?;
        let entry = self.connections.vacant_entry();
        let token = Token(entry.key());
        let mut connection = Connection::new(stream, authority.to_owned());
        connection.register(self.poll.registry(), token)?;
        log::debug!("io thread {}: connecting to {authority} ({addr})", self.id);
        entry.insert(connection);
        Ok(token)
    }

    fn assign(&mut self, token: Token, exchange: Exchange) {
        let Some(connection) = self.connections.get_mut(token.0) else {
            exchange.reject(io::Error::from(ErrorKind::NotConnected).into());
            return;
        };

        connection.start(exchange, self.keep_alive);
        if connection.is_connected() {
            if let Err(e) = connection.flush() {
                return self.fail_or_retry(token, e.into());
            }
        }
        if let Err(e) = connection.reregister(self.poll.registry(), token) {
            self.fail(token, e.into());
        }
    }

    fn connection_event(&mut self, token: Token, event: &Event) {
        let Some(connection) = self.connections.get_mut(token.0) else {
            return;
        };

        if !connection.is_connected() {
            if !(event.is_writable() || event.is_error() || event.is_write_closed()) {
                return;
            }
            match connection.finish_connect() {
                Ok(true) => log::trace!("connected to {}", connection.authority()),
                Ok(false) => return,
                Err(e) => return self.fail(token, e.into()),
            }
        }

        if let Err(e) = connection.flush() {
            return self.fail_or_retry(token, e.into());
        }

        if event.is_readable() || event.is_read_closed() {
            if let Err(e) = connection.fill() {
                return self.fail_or_retry(token, e.into());
            }
        }

        if connection.is_busy() {
            match connection.poll_response() {
                Ok(Some(response)) => return self.complete(token, response),
                Ok(None) if connection.is_eof() => {
                    let closed = io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "connection closed before a response arrived",
                    );
                    return self.fail_or_retry(token, closed.into());
                }
                Ok(None) => {}
                Err(e) => return self.fail(token, e.into()),
            }
        } else if connection.is_eof() || connection.has_unsolicited_data() || event.is_error() {
            // idle connection dropped or misused by the server
            self.close(token);
            return;
        }

        if let Err(e) = connection.reregister(self.poll.registry(), token) {
            self.fail(token, e.into());
        }
    }

    fn complete(&mut self, token: Token, response: Response) {
        let Some(connection) = self.connections.get_mut(token.0) else {
            return;
        };
        let exchange = connection.take_exchange();
        let authority = connection.authority().to_owned();

        let reusable = self.keep_alive
            && response.keep_alive()
            && !connection.is_eof()
            && !connection.has_unsolicited_data();
        if reusable && connection.reregister(self.poll.registry(), token).is_ok() {
            if let Some(pool) = self.pools.get_mut(&authority) {
                pool.idle.push(token);
            }
        } else {
            self.close(token);
        }

        self.pump(&authority);
        if let Some(exchange) = exchange {
            exchange.resolve(response);
        }
    }

    /// Removes a connection, returning the exchange it was carrying
    fn close(&mut self, token: Token) -> Option<Exchange> {
        let mut connection = self.connections.try_remove(token.0)?;
        let _ = connection.deregister(self.poll.registry());
        log::debug!("io thread {}: closing connection to {}", self.id, connection.authority());

        if let Some(pool) = self.pools.get_mut(connection.authority()) {
            pool.open = pool.open.saturating_sub(1);
            pool.idle.retain(|idle| *idle != token);
        }
        connection.take_exchange()
    }

    fn fail(&mut self, token: Token, error: Error) {
        let Some(authority) = self.connections.get(token.0).map(|c| c.authority().to_owned())
        else {
            return;
        };
        if let Some(exchange) = self.close(token) {
            exchange.reject(error);
        }
        self.pump(&authority);
    }

    /// An exchange on a pooled connection the server dropped before answering gets one more
    /// chance on a fresh connection; anything else fails.
    fn fail_or_retry(&mut self, token: Token, error: Error) {
        let stale = self.connections.get(token.0).is_some_and(Connection::is_stale);
        if !stale {
            return self.fail(token, error);
        }

        let Some(authority) = self.connections.get(token.0).map(|c| c.authority().to_owned())
        else {
            return;
        };
        if let Some(mut exchange) = self.close(token) {
            log::debug!("io thread {}: retrying on a fresh connection to {authority}", self.id);
            exchange.retried = true;
            match self.pools.get_mut(&authority) {
                Some(pool) => pool.queue.push_front(exchange),
                None => exchange.reject(error),
            }
        }
        self.pump(&authority);
    }

    fn next_deadline(&self) -> Option<Instant> {
        let in_flight = self.connections.iter().filter_map(|(_, c)| c.deadline());
        let queued = self
            .pools
            .values()
            .flat_map(|pool| pool.queue.iter().map(|e| e.deadline));
        in_flight.chain(queued).min()
    }

    /// Rejects every exchange whose deadline has passed.
    fn expire(&mut self, now: Instant) {
        let expired: Vec<_> = self
            .connections
            .iter()
            .filter(|(_, c)| c.deadline().is_some_and(|deadline| deadline <= now))
            .filter_map(|(key, c)| c.timeout().map(|timeout| (Token(key), timeout)))
            .collect();
        for (token, timeout) in expired {
            log::warn!("io thread {}: request timed out after {timeout:?}", self.id);
            self.fail(token, Error::Timeout(timeout));
        }

        for pool in self.pools.values_mut() {
            if !pool.queue.iter().any(|e| e.is_expired(now)) {
                continue;
            }
            let (expired, waiting): (VecDeque<_>, VecDeque<_>) =
                pool.queue.drain(..).partition(|e| e.is_expired(now));
            pool.queue = waiting;
            for exchange in expired {
                let timeout = exchange.timeout;
                exchange.reject(Error::Timeout(timeout));
            }
        }
    }

    /// Rejects everything still outstanding and releases every connection.
    fn abort(&mut self) {
        let mut outstanding = Vec::new();

        for (_, mut connection) in std::mem::take(&mut self.connections) {
            let _ = connection.deregister(self.poll.registry());
            outstanding.extend(connection.take_exchange());
        }
        for (_, pool) in self.pools.drain() {
            outstanding.extend(pool.queue);
        }
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Submit(exchange) = command {
                outstanding.push(exchange);
            }
        }

        if !outstanding.is_empty() {
            log::error!(
                "io thread {}: {} ({} request(s))",
                self.id,
                Violation::ShutdownWithPendingWork,
                outstanding.len()
            );
        }
        for exchange in outstanding {
            exchange.reject(Error::Shutdown);
        }
    }
}
