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

#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unused_imports,
    dead_code
)]
// Disallow warnings in examples.
#![doc(test(attr(deny(warnings))))]

//! ferry is a promise-based HTTP engine: an asynchronous client whose requests each yield a
//! [`Promise`], combinators to aggregate and wait on those promises, and a threaded [`Endpoint`]
//! dispatching requests to a [`Handler`].
//!
//! ## Examples
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use ferry::{
//!     client::{Client, ClientOptions},
//!     combinators::{when_all, Barrier},
//! };
//!
//! let client = Client::new(ClientOptions::default()).unwrap();
//! let responses: Vec<_> = (0..3).map(|_| client.get("localhost:9080").send()).collect();
//!
//! let all = when_all(responses);
//! let _ = Barrier::new(&all).wait_for(Duration::from_secs(5));
//! client.shutdown();
//! ```
//!
//! More examples can be found in the `demos` directory of the source code.

pub mod client;
pub mod codec;
pub mod combinators;
pub mod error;
pub mod http;
mod net;
pub mod promise;
pub mod server;

pub use error::{Error, Result, Violation};
pub use promise::{Promise, Resolver, State};
pub use server::{handler_fn, Endpoint, EndpointOptions, Handler, ResponseWriter};
