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

//! Request and response models

use super::{Method, Status, Version};

/// Raw header pairs in arrival order.
///
/// Names compare case-insensitively; values are not interpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Empty header list
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Appends a header, keeping any previous value for the same name
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replaces every value for `name` with `value`
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.entries.push((name, value.into()));
    }

    /// True if a header called `name` is present
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates `(name, value)` pairs in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of header lines
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when there are no headers
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a `Connection` header asks for the connection to be closed
    pub(crate) fn wants_close(&self) -> bool {
        self.get("connection")
            .is_some_and(|v| v.eq_ignore_ascii_case("close"))
    }

    /// Whether a `Connection` header asks for the connection to be kept
    pub(crate) fn wants_keep_alive(&self) -> bool {
        self.get("connection")
            .is_some_and(|v| v.eq_ignore_ascii_case("keep-alive"))
    }
}

/// A fully received request, as handed to a [`Handler`](crate::Handler)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: Method,
    target: String,
    version: Version,
    headers: Headers,
    body: Vec<u8>,
}

impl Request {
    /// Creates an HTTP/1.1 request without headers or body
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            version: Version::H1_1,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub(crate) fn from_parts(
        method: Method,
        target: String,
        version: Version,
        headers: Headers,
        body: Vec<u8>,
    ) -> Self {
        Self {
            method,
            target,
            version,
            headers,
            body,
        }
    }

    /// Request method
    pub fn method(&self) -> Method {
        self.method
    }

    /// Request target, usually an origin-form path
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Protocol version
    pub fn version(&self) -> Version {
        self.version
    }

    /// Request headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable request headers
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Request body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Replaces the body
    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    /// Whether the connection should stay open after this request is answered
    pub fn keep_alive(&self) -> bool {
        if self.headers.wants_close() {
            return false;
        }
        self.version.keeps_alive() || self.headers.wants_keep_alive()
    }
}

/// A fully received response, as delivered by a client promise
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    version: Version,
    status: Status,
    headers: Headers,
    body: Vec<u8>,
}

impl Response {
    /// Creates an HTTP/1.1 response with an empty body
    pub fn new(status: Status) -> Self {
        Self {
            version: Version::H1_1,
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub(crate) fn from_parts(
        version: Version,
        status: Status,
        headers: Headers,
        body: Vec<u8>,
    ) -> Self {
        Self {
            version,
            status,
            headers,
            body,
        }
    }

    /// Status code
    pub fn status(&self) -> Status {
        self.status
    }

    /// Protocol version
    pub fn version(&self) -> Version {
        self.version
    }

    /// Response headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Response body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Response body decoded as UTF-8, lossily
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Whether the server allows reusing the connection
    pub fn keep_alive(&self) -> bool {
        if self.headers.wants_close() {
            return false;
        }
        self.version.keeps_alive() || self.headers.wants_keep_alive()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_lookup_ignores_case() {
        let mut headers = Headers::new();
        headers.append("Content-Type", "text/plain");
        assert_eq!(Some("text/plain"), headers.get("content-type"));
    }

    #[test]
    fn header_insert_replaces_all_values() {
        let mut headers = Headers::new();
        headers.append("X-Trace", "a");
        headers.append("x-trace", "b");
        headers.insert("X-TRACE", "c");

        assert_eq!(1, headers.len());
        assert_eq!(Some("c"), headers.get("x-trace"));
    }

    #[test]
    fn http11_requests_keep_alive_by_default() {
        let request = Request::new(Method::Get, "/");
        assert!(request.keep_alive());
    }

    #[test]
    fn connection_close_overrides_version() {
        let mut request = Request::new(Method::Get, "/");
        request.headers_mut().insert("Connection", "close");
        assert!(!request.keep_alive());
    }

    #[test]
    fn http10_requires_explicit_keep_alive() {
        let mut headers = Headers::new();
        let response = Response::from_parts(Version::H1_0, Status::r#Ok, headers.clone(), vec![]);
        assert!(!response.keep_alive());

        headers.append("Connection", "Keep-Alive");
        let response = Response::from_parts(Version::H1_0, Status::r#Ok, headers, vec![]);
        assert!(response.keep_alive());
    }
}
