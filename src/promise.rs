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

//! Single-assignment asynchronous result cells.
//!
//! A [`Promise`] starts out pending and is settled exactly once through its [`Resolver`], either
//! with a value or with an [`Error`]. Continuations registered with [`Promise::then`] are pushed
//! the outcome by whichever thread settles the promise; nobody polls.
//!
//! ```
//! use ferry::Promise;
//!
//! let (promise, resolver) = Promise::pending();
//! let doubled = promise.then(|v: u32| v * 2, |_| {});
//!
//! std::thread::spawn(move || resolver.resolve(21)).join().unwrap().unwrap();
//! assert_eq!(Some(42), doubled.value());
//! ```

use std::{
    fmt,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use crate::error::{Error, Result, Violation};

/// Observable state of a [`Promise`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not settled yet
    Pending,
    /// Settled with a value
    Fulfilled,
    /// Settled with an error
    Rejected,
}

type Callback<T> = Box<dyn FnOnce(Result<T>) + Send>;

enum Outcome<T> {
    Pending,
    Resolved(T),
    Rejected(Error),
}

impl<T: Clone> Outcome<T> {
    fn get(&self) -> Option<Result<T>> {
        match self {
            Self::Pending => None,
            Self::Resolved(v) => Some(Ok(v.clone())),
            Self::Rejected(e) => Some(Err(e.clone())),
        }
    }
}

struct Inner<T> {
    outcome: Outcome<T>,
    callbacks: Vec<Callback<T>>,
}

struct Core<T> {
    inner: Mutex<Inner<T>>,
    settled: Condvar,
}

impl<T> Core<T> {
    fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                outcome: Outcome::Pending,
                callbacks: Vec::new(),
            }),
            settled: Condvar::new(),
        }
    }

    // Callbacks never run under the lock, so a poisoned mutex still holds a consistent state.
    #[inline]
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> State {
        match self.lock().outcome {
            Outcome::Pending => State::Pending,
            Outcome::Resolved(_) => State::Fulfilled,
            Outcome::Rejected(_) => State::Rejected,
        }
    }
}

impl<T: Clone> Core<T> {
    fn settle(&self, result: Result<T>) -> Result<()> {
        let callbacks = {
            let mut inner = self.lock();
            if !matches!(inner.outcome, Outcome::Pending) {
                log::error!("{}", Violation::AlreadySettled);
                return Err(Violation::AlreadySettled.into());
            }

            inner.outcome = match &result {
                Ok(v) => Outcome::Resolved(v.clone()),
                Err(e) => Outcome::Rejected(e.clone()),
            };
            std::mem::take(&mut inner.callbacks)
        };
        self.settled.notify_all();

        for callback in callbacks {
            callback(result.clone());
        }

        Ok(())
    }

    fn subscribe(&self, callback: Callback<T>) {
        let ready = {
            let mut inner = self.lock();
            match inner.outcome.get() {
                Some(result) => result,
                None => {
                    inner.callbacks.push(callback);
                    return;
                }
            }
        };

        callback(ready);
    }

    fn wait(&self, timeout: Option<Duration>) -> Option<Result<T>> {
        let inner = self.lock();
        let inner = match timeout {
            Some(timeout) => {
                self.settled
                    .wait_timeout_while(inner, timeout, |i| matches!(i.outcome, Outcome::Pending))
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => self
                .settled
                .wait_while(inner, |i| matches!(i.outcome, Outcome::Pending))
                .unwrap_or_else(PoisonError::into_inner),
        };

        inner.outcome.get()
    }
}

/// Shared handle to an asynchronous result.
///
/// Cloning a `Promise` hands out another reference to the same cell; the cell lives until the
/// last promise, resolver, or registered continuation referencing it is dropped.
pub struct Promise<T> {
    core: Arc<Core<T>>,
}

/// Producer side of a [`Promise`]
pub struct Resolver<T> {
    core: Arc<Core<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.core.state())
            .finish()
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("state", &self.core.state())
            .finish()
    }
}

impl<T> Promise<T> {
    /// Current state of the promise
    pub fn state(&self) -> State {
        self.core.state()
    }

    /// True until the promise is settled
    pub fn is_pending(&self) -> bool {
        self.state() == State::Pending
    }

    /// True once resolved with a value
    pub fn is_fulfilled(&self) -> bool {
        self.state() == State::Fulfilled
    }

    /// True once rejected with an error
    pub fn is_rejected(&self) -> bool {
        self.state() == State::Rejected
    }

    /// True once resolved or rejected
    pub fn is_settled(&self) -> bool {
        self.state() != State::Pending
    }
}

impl<T> Promise<T>
where
    T: Clone + Send + 'static,
{
    /// Creates a pending promise together with the resolver that will settle it.
    pub fn pending() -> (Self, Resolver<T>) {
        let core = Arc::new(Core::new());
        (Self { core: core.clone() }, Resolver { core })
    }

    /// Creates a promise and immediately hands its resolver to `producer`.
    ///
    /// The producer may settle the promise synchronously, or move the resolver to whatever thread
    /// will eventually produce the outcome.
    pub fn new<F>(producer: F) -> Self
    where
        F: FnOnce(Resolver<T>),
    {
        let (promise, resolver) = Self::pending();
        producer(resolver);
        promise
    }

    /// A promise already fulfilled with `value`
    pub fn resolved(value: T) -> Self {
        let (promise, resolver) = Self::pending();
        let _ = resolver.resolve(value);
        promise
    }

    /// A promise already rejected with `error`
    pub fn rejected(error: Error) -> Self {
        let (promise, resolver) = Self::pending();
        let _ = resolver.reject(error);
        promise
    }

    /// The fulfilled value, if any
    pub fn value(&self) -> Option<T> {
        self.peek().and_then(Result::ok)
    }

    /// The rejection error, if any
    pub fn error(&self) -> Option<Error> {
        self.peek().and_then(Result::err)
    }

    /// The outcome if the promise has settled, without blocking
    pub fn peek(&self) -> Option<Result<T>> {
        self.core.lock().outcome.get()
    }

    /// Registers a continuation pair.
    ///
    /// `on_resolve` is called with the value and its return value resolves the derived promise.
    /// On rejection `on_reject` observes the error and the derived promise is rejected with the
    /// same error, so failures travel down a chain. If the promise is already settled the
    /// matching callback runs right away on the calling thread; otherwise it runs on the thread
    /// that settles the promise.
    pub fn then<R, F, E>(&self, on_resolve: F, on_reject: E) -> Promise<R>
    where
        R: Clone + Send + 'static,
        F: FnOnce(T) -> R + Send + 'static,
        E: FnOnce(Error) + Send + 'static,
    {
        let (promise, resolver) = Promise::pending();
        self.on_settle(move |result| {
            // the resolver is fresh, settling it cannot fail
            let _ = match result {
                Ok(value) => resolver.resolve(on_resolve(value)),
                Err(error) => {
                    on_reject(error.clone());
                    resolver.reject(error)
                }
            };
        });
        promise
    }

    /// Chains a continuation that itself returns a promise, flattening the result.
    pub fn and_then<R, F>(&self, f: F) -> Promise<R>
    where
        R: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<R> + Send + 'static,
    {
        let (promise, resolver) = Promise::pending();
        self.on_settle(move |result| match result {
            Ok(value) => f(value).on_settle(move |inner| {
                let _ = resolver.settle(inner);
            }),
            Err(error) => {
                let _ = resolver.reject(error);
            }
        });
        promise
    }

    /// Registers a single callback receiving the outcome as a `Result`.
    pub fn on_settle<F>(&self, callback: F)
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        self.core.subscribe(Box::new(callback));
    }

    pub(crate) fn wait(&self, timeout: Option<Duration>) -> Option<Result<T>> {
        self.core.wait(timeout)
    }
}

impl<T> Resolver<T>
where
    T: Clone + Send + 'static,
{
    /// Fulfills the promise.
    ///
    /// Returns [`Violation::AlreadySettled`] if the promise was already resolved or rejected; the
    /// first outcome is kept.
    pub fn resolve(&self, value: T) -> Result<()> {
        self.core.settle(Ok(value))
    }

    /// Rejects the promise.
    ///
    /// Returns [`Violation::AlreadySettled`] if the promise was already resolved or rejected; the
    /// first outcome is kept.
    pub fn reject(&self, error: Error) -> Result<()> {
        self.core.settle(Err(error))
    }

    /// Settles the promise with either outcome
    pub fn settle(&self, result: Result<T>) -> Result<()> {
        self.core.settle(result)
    }

    /// True until the promise is settled
    pub fn is_pending(&self) -> bool {
        self.core.state() == State::Pending
    }
}
