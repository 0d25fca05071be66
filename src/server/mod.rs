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

//! Threaded HTTP endpoint.
//!
//! ```no_run
//! use ferry::{http::Status, server::handler_fn, Endpoint, EndpointOptions};
//!
//! let mut server = Endpoint::new("localhost:9080").unwrap();
//! server.init(EndpointOptions::default().threads(2).reuse_addr(true)).unwrap();
//! server.set_handler(handler_fn(|_request, writer| {
//!     let _ = writer.send(Status::r#Ok, "Hello, World!");
//! }));
//! server.serve_threaded().unwrap();
//! // ...
//! server.shutdown().unwrap();
//! ```

mod session;
mod worker;
mod writer;

use std::{
    fmt,
    net::{SocketAddr, ToSocketAddrs},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use mio::Waker;

pub use writer::ResponseWriter;

use crate::{
    error::{Error, Result},
    http::Request,
    net,
};

use self::worker::Worker;

/// Capability invoked once per request on the worker thread that received it.
///
/// The handler answers through `writer`, calling [`ResponseWriter::send`] exactly once.
pub trait Handler: Send + Sync + 'static {
    /// Handles one request
    fn on_request(&self, request: &Request, writer: &mut ResponseWriter<'_>);
}

/// [`Handler`] backed by a closure, see [`handler_fn`]
pub struct FnHandler<F> {
    f: F,
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

impl<F> Handler for FnHandler<F>
where
    F: Fn(&Request, &mut ResponseWriter<'_>) + Send + Sync + 'static,
{
    fn on_request(&self, request: &Request, writer: &mut ResponseWriter<'_>) {
        (self.f)(request, writer)
    }
}

/// Wraps a closure into a [`Handler`]
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&Request, &mut ResponseWriter<'_>) + Send + Sync + 'static,
{
    FnHandler { f }
}

/// Configuration for the endpoint
#[derive(Debug, Clone)]
pub struct EndpointOptions {
    pub(crate) threads: usize,
    pub(crate) reuse_addr: bool,
    pub(crate) backlog: i32,
    pub(crate) max_payload: usize,
    pub(crate) nodelay: bool,
    pub(crate) max_events: usize,
    pub(crate) header_timeout: Duration,
    pub(crate) body_timeout: Duration,
    pub(crate) keep_alive_timeout: Duration,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            reuse_addr: false,
            backlog: 128,
            max_payload: 4096,
            nodelay: false,
            max_events: 1024,
            header_timeout: Duration::from_secs(60),
            body_timeout: Duration::from_secs(60),
            keep_alive_timeout: Duration::from_secs(600),
        }
    }
}

impl EndpointOptions {
    /// Number of worker threads, each accepting and serving its own connections
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Sets `SO_REUSEADDR` so the address can be bound again right after shutdown
    pub fn reuse_addr(mut self, reuse: bool) -> Self {
        self.reuse_addr = reuse;
        self
    }

    /// Length of the pending connection queue
    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Largest request body accepted; larger requests get `413 Content Too Large`
    pub fn max_payload(mut self, bytes: usize) -> Self {
        self.max_payload = bytes;
        self
    }

    /// Sets `TCP_NODELAY` on accepted connections
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Time a client has to deliver a complete request head, counted from its first byte.
    /// Late requests are answered with `408 Request Timeout`.
    pub fn header_timeout(mut self, timeout: Duration) -> Self {
        self.header_timeout = timeout;
        self
    }

    /// Time a client has to deliver a complete request, body included, counted from its first
    /// byte. Late requests are answered with `408 Request Timeout`.
    pub fn body_timeout(mut self, timeout: Duration) -> Self {
        self.body_timeout = timeout;
        self
    }

    /// How long a connection may wait for its next request before it is closed
    pub fn keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = timeout;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::InvalidOptions(String::from(
                "thread count must be positive",
            )));
        }
        if self.backlog <= 0 {
            return Err(Error::InvalidOptions(String::from(
                "backlog must be positive",
            )));
        }
        if [self.header_timeout, self.body_timeout, self.keep_alive_timeout]
            .iter()
            .any(Duration::is_zero)
        {
            return Err(Error::InvalidOptions(String::from(
                "timeouts must be positive",
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct WorkerHandle {
    waker: Arc<Waker>,
    thread: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Initialized,
    Serving,
    Stopped,
}

/// HTTP server dispatching requests to a [`Handler`] from a pool of worker threads.
pub struct Endpoint {
    addr: SocketAddr,
    options: EndpointOptions,
    listener: Option<std::net::TcpListener>,
    handler: Option<Arc<dyn Handler>>,
    workers: Vec<WorkerHandle>,
    stop: Arc<AtomicBool>,
    lifecycle: Lifecycle,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("addr", &self.addr)
            .field("options", &self.options)
            .field("workers", &self.workers.len())
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

impl Endpoint {
    /// Creates an endpoint for `addr`. Nothing is bound until [`init`](Self::init).
    pub fn new(addr: impl ToSocketAddrs) -> Result<Self> {
        Ok(Self {
            addr: net::resolve(addr)?,
            options: EndpointOptions::default(),
            listener: None,
            handler: None,
            workers: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
            lifecycle: Lifecycle::Created,
        })
    }

    /// Default options, to be customized and passed to [`init`](Self::init)
    pub fn options() -> EndpointOptions {
        EndpointOptions::default()
    }

    /// Validates `options` and binds the listening socket.
    pub fn init(&mut self, options: EndpointOptions) -> Result<()> {
        if self.lifecycle != Lifecycle::Created {
            return Err(Error::InvalidOptions(String::from(
                "endpoint is already initialized",
            )));
        }
        options.validate()?;

        let listener = net::bind_listener(self.addr, options.reuse_addr, options.backlog)?;
        self.addr = listener.local_addr()?;
        log::debug!("bound {}", self.addr);

        self.listener = Some(listener);
        self.options = options;
        self.lifecycle = Lifecycle::Initialized;
        Ok(())
    }

    /// Binds the handler invoked for every request
    pub fn set_handler(&mut self, handler: impl Handler) {
        self.handler = Some(Arc::new(handler));
    }

    /// Address the endpoint is bound to. After [`init`](Self::init) this carries the port the
    /// system assigned when port 0 was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Port the endpoint is bound to
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Whether worker threads are running
    pub fn is_serving(&self) -> bool {
        self.lifecycle == Lifecycle::Serving
    }

    /// Launches the worker threads and returns immediately.
    ///
    /// Initializes with default options if [`init`](Self::init) was not called.
    pub fn serve_threaded(&mut self) -> Result<()> {
        if self.lifecycle == Lifecycle::Created {
            self.init(EndpointOptions::default())?;
        }
        if self.lifecycle != Lifecycle::Initialized {
            return Err(Error::InvalidOptions(String::from(
                "endpoint is already serving or stopped",
            )));
        }
        let handler = self
            .handler
            .clone()
            .ok_or_else(|| Error::InvalidOptions(String::from("no handler bound")))?;
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| Error::InvalidOptions(String::from("endpoint is not bound")))?;

        for id in 0..self.options.threads {
            let spawned = Worker::new(id, listener, handler.clone(), self.stop.clone(), &self.options)
                .and_then(|(mut worker, waker)| {
                    thread::Builder::new()
                        .name(format!("ferry-worker-{id}"))
                        .spawn(move || worker.run())
                        .map(|thread| WorkerHandle { waker, thread })
                });

            match spawned {
                Ok(handle) => self.workers.push(handle),
                Err(e) => {
                    log::error!("could not start worker {id}: {e}");
                    self.lifecycle = Lifecycle::Serving;
                    let _ = self.shutdown();
                    return Err(e.into());
                }
            }
        }

        log::info!(
            "serving on {} with {} worker(s)",
            self.addr,
            self.workers.len()
        );
        self.lifecycle = Lifecycle::Serving;
        Ok(())
    }

    /// Stops accepting connections, lets every worker finish its current dispatch, joins all
    /// worker threads and releases the listening socket. Calling it again is a no-op.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.lifecycle == Lifecycle::Stopped {
            return Ok(());
        }

        self.stop.store(true, Ordering::Release);
        for worker in &self.workers {
            if let Err(e) = worker.waker.wake() {
                log::warn!("could not wake worker: {e}");
            }
        }

        let mut panicked = 0;
        for worker in self.workers.drain(..) {
            if worker.thread.join().is_err() {
                panicked += 1;
            }
        }

        self.listener = None;
        self.lifecycle = Lifecycle::Stopped;
        log::info!("endpoint {} stopped", self.addr);

        if panicked > 0 {
            log::error!("{panicked} worker(s) panicked");
            return Err(Error::rejected(format!("{panicked} worker(s) panicked")));
        }
        Ok(())
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
