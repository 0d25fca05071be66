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

//! Workers accept connections and drive every request on them to completion: reading, parsing,
//! calling the handler and writing the response.
//!
//! Each worker owns its own `Poll`, a clone of the listening socket and the set of connections it
//! accepted. Workers share nothing but the handler and the stop flag, so no connection is ever
//! touched by two threads.

use std::{
    fmt,
    io::{self, ErrorKind},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use mio::{event::Event, net::TcpListener, Events, Interest, Poll, Token, Waker};
use slab::Slab;

use super::{
    session::{Session, Timeouts},
    EndpointOptions, Handler,
};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKE_TOKEN: Token = Token(usize::MAX - 1);

/// Event loop serving one partition of the endpoint's connections
pub(crate) struct Worker {
    id: usize,
    listener: TcpListener,
    poll: Poll,
    num_events: usize,
    sessions: Slab<Session>,
    handler: Arc<dyn Handler>,
    stop: Arc<AtomicBool>,
    max_payload: usize,
    nodelay: bool,
    timeouts: Timeouts,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

impl Worker {
    /// Creates a worker over its own clone of `listener`, returning the waker used to interrupt
    /// its poll on shutdown.
    pub(crate) fn new(
        id: usize,
        listener: &std::net::TcpListener,
        handler: Arc<dyn Handler>,
        stop: Arc<AtomicBool>,
        options: &EndpointOptions,
    ) -> io::Result<(Self, Arc<Waker>)> {
        let mut listener = TcpListener::from_std(listener.try_clone()?);
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);

        let worker = Self {
            id,
            listener,
            poll,
            num_events: options.max_events,
            sessions: Slab::with_capacity(64),
            handler,
            stop,
            max_payload: options.max_payload,
            nodelay: options.nodelay,
            timeouts: Timeouts {
                header: options.header_timeout,
                body: options.body_timeout,
                keep_alive: options.keep_alive_timeout,
            },
        };
        Ok((worker, waker))
    }

    fn accept(&mut self) {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                // another worker got there first, or the backlog is drained
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("worker {}: accept failed: {e}", self.id);
                    return;
                }
            };

            if self.nodelay {
                let _ = stream.set_nodelay(true);
            }

            let entry = self.sessions.vacant_entry();
            let token = Token(entry.key());
            let mut session = Session::new(stream, peer);
            // drop session if we can't register with poll
            match session.register(self.poll.registry(), token) {
                Ok(()) => {
                    log::debug!("worker {}: accepted {peer}", self.id);
                    entry.insert(session);
                }
                Err(e) => log::warn!("worker {}: could not register {peer}: {e}", self.id),
            }
        }
    }

    fn session_event(&mut self, event: &Event) {
        let token = event.token();
        let handler = &self.handler;
        let Some(session) = self.sessions.get_mut(token.0) else {
            return;
        };

        if event.is_readable() || event.is_read_closed() {
            if let Err(e) = session.fill() {
                log::debug!("{}: read failed: {e}", session.peer());
                return self.close(token);
            }
            session.dispatch(handler.as_ref(), self.max_payload);
        }

        if let Err(e) = session.flush() {
            log::debug!("{}: write failed: {e}", session.peer());
            return self.close(token);
        }

        if session.is_done() || event.is_error() {
            return self.close(token);
        }

        if let Err(e) = session.reregister(self.poll.registry(), token) {
            log::warn!("{}: could not reregister: {e}", session.peer());
            self.close(token);
        }
    }

    fn close(&mut self, token: Token) {
        if let Some(mut session) = self.sessions.try_remove(token.0) {
            log::debug!("worker {}: closing {}", self.id, session.peer());
            let _ = session.deregister(self.poll.registry());
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.sessions
            .iter()
            .filter_map(|(_, session)| session.deadline(&self.timeouts))
            .min()
    }

    /// Answers or closes every session whose deadline has passed.
    fn expire(&mut self, now: Instant) {
        let expired: Vec<_> = self
            .sessions
            .iter()
            .filter(|(_, session)| {
                session
                    .deadline(&self.timeouts)
                    .is_some_and(|deadline| deadline <= now)
            })
            .map(|(key, _)| Token(key))
            .collect();

        for token in expired {
            let Some(session) = self.sessions.get_mut(token.0) else {
                continue;
            };
            session.time_out();
            if session.flush().is_err() || session.is_done() {
                self.close(token);
            } else if session.reregister(self.poll.registry(), token).is_err() {
                self.close(token);
            }
        }
    }

    /// Main event loop of the worker. Blocks the thread until the stop flag is raised and the
    /// worker is woken.
    pub(crate) fn run(&mut self) {
        let mut events = Events::with_capacity(self.num_events);
        log::debug!("worker {} started", self.id);

        while !self.stop.load(Ordering::Acquire) {
            let timeout = self
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()));

            if let Err(err) = self.poll.poll(&mut events, timeout) {
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                log::error!("worker {}: failed to poll for events: {err}", self.id);
                break;
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept(),
                    WAKE_TOKEN => {}
                    _ => self.session_event(event),
                }
            }

            self.expire(Instant::now());
        }

        self.drain();
        log::debug!("worker {} stopped", self.id);
    }

    // Dispatches are synchronous, so nothing is in flight here; give pending responses one last
    // chance to reach the wire.
    fn drain(&mut self) {
        for mut session in self.sessions.drain() {
            let _ = session.flush();
            let _ = session.deregister(self.poll.registry());
        }
        let _ = self.poll.registry().deregister(&mut self.listener);
    }
}
