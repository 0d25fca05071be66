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

//! Errors surfaced through promise rejections, endpoint operations and contract checks

use std::{fmt, io, sync::Arc, time::Duration};

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the engine can report.
///
/// `Error` is `Clone` so a single rejection can be delivered to every continuation registered on
/// a promise. I/O errors are shared behind an `Arc` for that reason.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Connection refused, reset, or closed before a full message was exchanged
    #[error("transport error: {0}")]
    Transport(Arc<io::Error>),

    /// No complete response arrived before the request deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Bytes on the wire could not be parsed as an HTTP message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A broken invariant on the caller's side
    #[error("contract violation: {0}")]
    Contract(Violation),

    /// Rejection raised explicitly by a producer
    #[error("rejected: {0}")]
    Rejected(String),

    /// Outstanding work was aborted because its owner shut down
    #[error("operation aborted by shutdown")]
    Shutdown,

    /// Options passed to an endpoint or client are unusable
    #[error("invalid options: {0}")]
    InvalidOptions(String),
}

impl Error {
    /// Shorthand for a producer-raised rejection
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    /// The underlying [`io::ErrorKind`] for transport and timeout errors.
    pub fn kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Transport(e) => Some(e.kind()),
            Self::Timeout(_) => Some(io::ErrorKind::TimedOut),
            _ => None,
        }
    }

    /// True for errors that indicate a programming mistake rather than a transient condition
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::Contract(_))
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::Transport(Arc::new(value))
    }
}

impl From<httparse::Error> for Error {
    fn from(value: httparse::Error) -> Self {
        Self::Protocol(value.to_string())
    }
}

impl From<Violation> for Error {
    fn from(value: Violation) -> Self {
        Self::Contract(value)
    }
}

/// Contract violations. These are reported loudly, never swallowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// A promise was resolved or rejected a second time
    AlreadySettled,
    /// A handler called the terminal send operation more than once
    DoubleSend,
    /// A handler returned without sending a response
    SendOmitted,
    /// A client was shut down while some of its promises were still pending
    ShutdownWithPendingWork,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AlreadySettled => "attempt to settle an already settled promise",
            Self::DoubleSend => "response was sent more than once",
            Self::SendOmitted => "handler returned without sending a response",
            Self::ShutdownWithPendingWork => "shutdown while requests were still in flight",
        })
    }
}
