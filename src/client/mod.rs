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

//! Asynchronous HTTP client.
//!
//! Every request returns a [`Promise`] immediately. The exchange itself happens on one of the
//! client's I/O threads, which settles the promise, so continuations registered with
//! [`Promise::then`] run on that thread.
//!
//! ```no_run
//! use ferry::client::{Client, ClientOptions};
//!
//! let client = Client::new(ClientOptions::default().threads(2)).unwrap();
//! let response = client.get("localhost:9080/hello").header("Accept", "text/plain").send();
//! response.then(
//!     |response| println!("{}", response.body_text()),
//!     |error| eprintln!("{error}"),
//! );
//! ```

mod connection;
mod reactor;

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc::{self, Sender},
        Mutex,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use mio::{Poll, Waker};

use crate::{
    error::{Error, Result},
    http::{Method, Request, Response},
    promise::Promise,
};

use self::{
    connection::Exchange,
    reactor::{Command, Reactor, WAKE_TOKEN},
};

/// Configuration for the client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub(crate) threads: usize,
    pub(crate) max_connections_per_host: usize,
    pub(crate) keep_alive: bool,
    pub(crate) timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            max_connections_per_host: 8,
            keep_alive: true,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ClientOptions {
    /// Number of I/O threads. Requests are spread over them round-robin.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Upper bound on simultaneous connections each I/O thread opens to one host. Requests
    /// beyond it wait in line for a connection to free up.
    pub fn max_connections_per_host(mut self, max: usize) -> Self {
        self.max_connections_per_host = max;
        self
    }

    /// Whether connections are kept open and reused between requests
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Default deadline of a request, measured from the moment it is sent
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::InvalidOptions(String::from(
                "thread count must be positive",
            )));
        }
        if self.max_connections_per_host == 0 {
            return Err(Error::InvalidOptions(String::from(
                "connections per host must be positive",
            )));
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidOptions(String::from(
                "timeout must be positive",
            )));
        }
        deadline(self.timeout)?;
        Ok(())
    }
}

#[derive(Debug)]
struct ReactorHandle {
    commands: Mutex<Sender<Command>>,
    waker: Waker,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ReactorHandle {
    fn send(&self, command: Command) -> std::result::Result<(), Command> {
        let sent = match self.commands.lock() {
            Ok(sender) => sender.send(command).map_err(|e| e.0),
            Err(_) => Err(command),
        };
        sent?;

        if let Err(e) = self.waker.wake() {
            log::warn!("could not wake io thread: {e}");
        }
        Ok(())
    }
}

/// HTTP client backed by a pool of I/O threads.
///
/// Dropping the client shuts it down.
#[derive(Debug)]
pub struct Client {
    options: ClientOptions,
    reactors: Vec<ReactorHandle>,
    next: AtomicUsize,
    stopped: AtomicBool,
}

impl Client {
    /// Validates `options` and starts the I/O threads.
    pub fn new(options: ClientOptions) -> Result<Self> {
        options.validate()?;

        let mut client = Self {
            options,
            reactors: Vec::new(),
            next: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        };

        for id in 0..client.options.threads {
            match client.spawn(id) {
                Ok(handle) => client.reactors.push(handle),
                Err(e) => {
                    log::error!("could not start io thread {id}: {e}");
                    client.shutdown();
                    return Err(e.into());
                }
            }
        }

        log::debug!("client started with {} io thread(s)", client.reactors.len());
        Ok(client)
    }

    fn spawn(&self, id: usize) -> std::io::Result<ReactorHandle> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
        let (commands, receiver) = mpsc::channel();
        let mut reactor = Reactor::new(
            id,
            poll,
            receiver,
            self.options.max_connections_per_host,
            self.options.keep_alive,
        );

        let thread = thread::Builder::new()
            .name(format!("ferry-io-{id}"))
            .spawn(move || {
                // outstanding exchanges drop with the reactor and reject their promises
                if panic::catch_unwind(AssertUnwindSafe(|| reactor.run())).is_err() {
                    log::error!("io thread {id} panicked");
                }
            })?;

        Ok(ReactorHandle {
            commands: Mutex::new(commands),
            waker,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Options the client was created with
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Sends a request without headers or body. Shorthand for building one with
    /// [`RequestBuilder`].
    pub fn request(&self, method: Method, target: &str) -> Promise<Response> {
        RequestBuilder::new(self, method, target).send()
    }

    /// Starts a `GET` request
    pub fn get(&self, target: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::Get, target)
    }

    /// Starts a `POST` request
    pub fn post(&self, target: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::Post, target)
    }

    /// Starts a `PUT` request
    pub fn put(&self, target: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::Put, target)
    }

    /// Starts a `DELETE` request
    pub fn delete(&self, target: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::Delete, target)
    }

    fn submit(&self, exchange: Exchange) {
        if self.stopped.load(Ordering::Acquire) || self.reactors.is_empty() {
            return exchange.reject(Error::Shutdown);
        }

        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.reactors.len();
        if let Err(Command::Submit(exchange)) = self.reactors[index].send(Command::Submit(exchange))
        {
            exchange.reject(Error::Shutdown);
        }
    }

    /// Stops every I/O thread and waits for it to exit. Requests still outstanding are rejected
    /// with [`Error::Shutdown`]. Calling it again is a no-op.
    ///
    /// Must not be called from a continuation running on one of the client's own threads; such a
    /// call stops the threads without joining them.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        for reactor in &self.reactors {
            let _ = reactor.send(Command::Shutdown);
        }

        let current = thread::current().id();
        for reactor in &self.reactors {
            let thread = match reactor.thread.lock() {
                Ok(mut thread) => thread.take(),
                Err(_) => None,
            };
            let Some(thread) = thread else {
                continue;
            };
            if thread.thread().id() == current {
                log::error!("client shut down from its own io thread, not joining");
                continue;
            }
            if thread.join().is_err() {
                log::error!("io thread panicked");
            }
        }
        log::debug!("client stopped");
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A request being assembled. [`send`](Self::send) may be called any number of times, each
/// call issuing an independent exchange.
#[derive(Debug)]
pub struct RequestBuilder<'a> {
    client: &'a Client,
    target: std::result::Result<Target, Error>,
    request: Request,
    timeout: Duration,
}

impl<'a> RequestBuilder<'a> {
    fn new(client: &'a Client, method: Method, target: &str) -> Self {
        let target = Target::parse(target);
        let path = target.as_ref().map_or("/", |t| t.path.as_str());
        Self {
            client,
            request: Request::new(method, path),
            target,
            timeout: client.options.timeout,
        }
    }

    /// Appends a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers_mut().append(name, value);
        self
    }

    /// Sets the body
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.request.set_body(body);
        self
    }

    /// Overrides the client's default deadline for this request
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Issues the request. The promise resolves with any complete response, whatever its
    /// status, and rejects on transport failure, timeout or an unparsable response.
    pub fn send(&self) -> Promise<Response> {
        let target = match &self.target {
            Ok(target) => target,
            Err(e) => return Promise::rejected(e.clone()),
        };

        let deadline = match deadline(self.timeout) {
            Ok(deadline) => deadline,
            Err(e) => return Promise::rejected(e),
        };

        let (promise, resolver) = Promise::pending();
        self.client.submit(Exchange {
            request: self.request.clone(),
            authority: target.authority.clone(),
            timeout: self.timeout,
            deadline,
            resolver,
            retried: false,
        });
        promise
    }
}

fn deadline(timeout: Duration) -> Result<Instant> {
    Instant::now()
        .checked_add(timeout)
        .ok_or_else(|| Error::InvalidOptions(format!("timeout {timeout:?} is out of range")))
}

/// `host[:port][/path]`, optionally prefixed with `http://`
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    authority: String,
    path: String,
}

impl Target {
    fn parse(target: &str) -> Result<Self> {
        if target.starts_with("https://") {
            return Err(Error::Protocol(format!("{target}: TLS is not supported")));
        }
        let target = target.strip_prefix("http://").unwrap_or(target);

        let (authority, path) = match target.find('/') {
            Some(slash) => target.split_at(slash),
            None => (target, "/"),
        };
        if authority.is_empty() {
            return Err(Error::Protocol(format!("{target}: missing host")));
        }

        // a bare IPv6 address has colons but no brackets
        let has_port = match authority.rsplit_once(':') {
            Some((host, port)) => {
                !host.is_empty() && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())
            }
            None => false,
        };
        let authority = if has_port {
            authority.to_owned()
        } else {
            format!("{authority}:80")
        };

        Ok(Self {
            authority,
            path: path.to_owned(),
        })
    }
}
