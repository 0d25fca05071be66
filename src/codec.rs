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

//! HTTP/1.x framing on top of `httparse`.
//!
//! Only what the engine needs to move complete messages is understood here: the request and
//! status lines, raw header pairs, and bodies framed by `Content-Length` (or, for responses, by
//! the end of the stream). Chunked transfer coding is rejected.

use std::{io::Write, str::from_utf8};

use crate::{
    error::Error,
    http::{Headers, Method, Request, Response, Status, Version},
};

/// Maximum number of header lines accepted in one message
pub const MAX_HEADERS: usize = 64;
/// Maximum size of a message head, in bytes
pub const MAX_HEAD_LENGTH: usize = 8 * 1024;

const SERVER: &str = concat!("ferry/", env!("CARGO_PKG_VERSION"));

/// Reasons a message could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The bytes are not a valid HTTP/1.x message
    #[error("malformed message: {0}")]
    Malformed(String),
    /// The declared body exceeds the configured limit
    #[error("body of {length} bytes exceeds the {limit} byte limit")]
    TooLarge {
        /// Declared `Content-Length`
        length: usize,
        /// Configured maximum
        limit: usize,
    },
}

impl From<httparse::Error> for DecodeError {
    fn from(value: httparse::Error) -> Self {
        Self::Malformed(value.to_string())
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Error::Protocol(value.to_string())
    }
}

/// A decoded message together with the number of bytes it occupied in the input
pub type Decoded<T> = Option<(T, usize)>;

fn collect_headers(raw: &[httparse::Header<'_>]) -> Result<Headers, DecodeError> {
    let mut headers = Headers::new();
    for header in raw {
        let value = from_utf8(header.value)
            .map_err(|_| DecodeError::Malformed(format!("non UTF-8 value for {}", header.name)))?;
        headers.append(header.name, value.trim());
    }
    Ok(headers)
}

fn content_length(headers: &Headers) -> Result<Option<usize>, DecodeError> {
    if headers
        .get("transfer-encoding")
        .is_some_and(|v| !v.eq_ignore_ascii_case("identity"))
    {
        return Err(DecodeError::Malformed(String::from(
            "transfer codings are not supported",
        )));
    }

    headers
        .get("content-length")
        .map(|v| {
            v.parse::<usize>()
                .map_err(|_| DecodeError::Malformed(format!("invalid content-length {v:?}")))
        })
        .transpose()
}

fn body_end(head_len: usize, length: usize) -> Result<usize, DecodeError> {
    head_len
        .checked_add(length)
        .ok_or_else(|| DecodeError::Malformed(format!("content-length {length} out of range")))
}

fn check_head_length(buf: &[u8]) -> Result<(), DecodeError> {
    if buf.len() > MAX_HEAD_LENGTH {
        return Err(DecodeError::Malformed(format!(
            "message head exceeds {MAX_HEAD_LENGTH} bytes"
        )));
    }
    Ok(())
}

/// Decodes one request from the front of `buf`.
///
/// Returns `Ok(None)` while the request is incomplete. A declared body longer than `max_payload`
/// is refused as soon as the head has been read, without waiting for the body.
pub fn decode_request(buf: &[u8], max_payload: usize) -> Result<Decoded<Request>, DecodeError> {
    let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut raw);

    let head_len = match parsed.parse(buf)? {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => {
            check_head_length(buf)?;
            return Ok(None);
        }
    };

    let method = parsed
        .method
        .unwrap_or_default()
        .parse::<Method>()
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let target = parsed.path.unwrap_or("/").to_owned();
    let version = Version::try_from(parsed.version.unwrap_or(1))
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let headers = collect_headers(parsed.headers)?;

    let length = content_length(&headers)?.unwrap_or(0);
    if length > max_payload {
        return Err(DecodeError::TooLarge {
            length,
            limit: max_payload,
        });
    }
    let end = body_end(head_len, length)?;
    if buf.len() < end {
        return Ok(None);
    }

    let body = buf[head_len..end].to_vec();
    let request = Request::from_parts(method, target, version, headers, body);
    Ok(Some((request, end)))
}

/// Decodes one response from the front of `buf`.
///
/// `eof` tells whether the peer has closed its side; a response without `Content-Length` is
/// delimited by the end of the stream, so it only completes once `eof` is set.
pub fn decode_response(
    buf: &[u8],
    head_request: bool,
    eof: bool,
) -> Result<Decoded<Response>, DecodeError> {
    let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut raw);

    let head_len = match parsed.parse(buf)? {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => {
            check_head_length(buf)?;
            if eof && !buf.is_empty() {
                return Err(DecodeError::Malformed(String::from(
                    "stream ended inside the response head",
                )));
            }
            return Ok(None);
        }
    };

    let status = Status::try_from(parsed.code.unwrap_or_default())
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let version = Version::try_from(parsed.version.unwrap_or(1))
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let headers = collect_headers(parsed.headers)?;

    let bodiless = head_request
        || matches!(status.as_u16(), 100..=199 | 204 | 304);
    let length = if bodiless {
        Some(0)
    } else {
        content_length(&headers)?
    };

    let end = match length.map(|length| body_end(head_len, length)).transpose()? {
        Some(end) if buf.len() >= end => end,
        Some(_) if eof => {
            return Err(DecodeError::Malformed(String::from(
                "stream ended inside the response body",
            )))
        }
        Some(_) => return Ok(None),
        None if eof => buf.len(),
        None => return Ok(None),
    };

    let body = buf[head_len..end].to_vec();
    Ok(Some((Response::from_parts(version, status, headers, body), end)))
}

/// Serializes a request for `host`, adding `Host`, `Content-Length` and `Connection` headers
/// unless the caller already set them.
pub fn encode_request(request: &Request, host: &str, keep_alive: bool, out: &mut Vec<u8>) {
    // writes to a Vec never fail
    let _ = write!(
        out,
        "{} {} {}\r\n",
        request.method(),
        request.target(),
        request.version()
    );

    let headers = request.headers();
    if !headers.contains("host") {
        let _ = write!(out, "Host: {host}\r\n");
    }
    if !headers.contains("content-length")
        && (!request.body().is_empty()
            || matches!(request.method(), Method::Post | Method::Put | Method::Patch))
    {
        let _ = write!(out, "Content-Length: {}\r\n", request.body().len());
    }
    if !headers.contains("connection") {
        let _ = write!(
            out,
            "Connection: {}\r\n",
            if keep_alive { "keep-alive" } else { "close" }
        );
    }
    for (name, value) in headers.iter() {
        let _ = write!(out, "{name}: {value}\r\n");
    }

    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(request.body());
}

/// Serializes a response. `Content-Length` is always written from `body`.
pub fn encode_response(
    version: Version,
    status: Status,
    headers: &Headers,
    body: &[u8],
    keep_alive: bool,
    out: &mut Vec<u8>,
) {
    let _ = write!(
        out,
        "{} {} {}\r\nServer: {}\r\n",
        version,
        status.as_u16(),
        status.reason(),
        SERVER
    );

    for (name, value) in headers.iter() {
        if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("connection")
        {
            continue;
        }
        let _ = write!(out, "{name}: {value}\r\n");
    }
    let _ = write!(
        out,
        "Content-Length: {}\r\nConnection: {}\r\n\r\n",
        body.len(),
        if keep_alive { "keep-alive" } else { "close" }
    );
    out.extend_from_slice(body);
}
