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

//! Http Status Codes
//! [RFC 9110 Section 15](https://www.rfc-editor.org/rfc/rfc9110#section-15)

use std::fmt::Display;

use crate::error::Error;

/// Http Status Codes
/// [RFC 9110 Section 15](https://www.rfc-editor.org/rfc/rfc9110#section-15)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// 15.2.1
    Continue,
    /// 15.2.2
    SwitchingProtocols,
    /// 15.3.1
    r#Ok,
    /// 15.3.2
    Created,
    /// 15.3.3
    Accepted,
    /// 15.3.4
    NonAuthoritativeInformation,
    /// 15.3.5
    NoContent,
    /// 15.3.6
    ResetContent,
    /// 15.3.7
    PartialContent,
    /// 15.4.1
    MultipleChoices,
    /// 15.4.2
    MovedPermanently,
    /// 15.4.3
    Found,
    /// 15.4.4
    SeeOther,
    /// 15.4.5
    NotModified,
    /// 15.4.6
    UseProxy,
    /// 15.4.8
    TemporaryRedirect,
    /// 15.4.9
    PermanentRedirect,
    /// 15.5.1
    BadRequest,
    /// 15.5.2
    Unauthorized,
    /// 15.5.3
    PaymentRequired,
    /// 15.5.4
    Forbidden,
    /// 15.5.5
    NotFound,
    /// 15.5.6
    MethodNotAllowed,
    /// 15.5.7
    NotAcceptable,
    /// 15.5.8
    ProxyAuthenticationRequired,
    /// 15.5.9
    RequestTimeout,
    /// 15.5.10
    Conflict,
    /// 15.5.11
    Gone,
    /// 15.5.12
    LengthRequired,
    /// 15.5.13
    PreconditionFailed,
    /// 15.5.14
    ContentTooLarge,
    /// 15.5.15
    UriTooLong,
    /// 15.5.16
    UnsupportedMediaType,
    /// 15.5.17
    RangeNotSatisfiable,
    /// 15.5.18
    ExpectationFailed,
    /// 15.5.20
    MisdirectedRequest,
    /// 15.5.21
    UnprocessableContent,
    /// 15.5.22
    UpgradeRequired,
    /// RFC 6585 4
    TooManyRequests,
    /// 15.6.1
    InternalServerError,
    /// 15.6.2
    NotImplemented,
    /// 15.6.3
    BadGateway,
    /// 15.6.4
    ServiceUnavailable,
    /// 15.6.5
    GatewayTimeout,
    /// 15.6.6
    HTTPVersionNotSupported,
    /// Any other code in `100..=999`, carried verbatim
    Other(u16),
}

impl Status {
    /// Numeric status code
    #[inline]
    pub fn as_u16(&self) -> u16 {
        match self {
            Self::Continue => 100,
            Self::SwitchingProtocols => 101,
            Self::r#Ok => 200,
            Self::Created => 201,
            Self::Accepted => 202,
            Self::NonAuthoritativeInformation => 203,
            Self::NoContent => 204,
            Self::ResetContent => 205,
            Self::PartialContent => 206,
            Self::MultipleChoices => 300,
            Self::MovedPermanently => 301,
            Self::Found => 302,
            Self::SeeOther => 303,
            Self::NotModified => 304,
            Self::UseProxy => 305,
            Self::TemporaryRedirect => 307,
            Self::PermanentRedirect => 308,
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::PaymentRequired => 402,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::MethodNotAllowed => 405,
            Self::NotAcceptable => 406,
            Self::ProxyAuthenticationRequired => 407,
            Self::RequestTimeout => 408,
            Self::Conflict => 409,
            Self::Gone => 410,
            Self::LengthRequired => 411,
            Self::PreconditionFailed => 412,
            Self::ContentTooLarge => 413,
            Self::UriTooLong => 414,
            Self::UnsupportedMediaType => 415,
            Self::RangeNotSatisfiable => 416,
            Self::ExpectationFailed => 417,
            Self::MisdirectedRequest => 421,
            Self::UnprocessableContent => 422,
            Self::UpgradeRequired => 426,
            Self::TooManyRequests => 429,
            Self::InternalServerError => 500,
            Self::NotImplemented => 501,
            Self::BadGateway => 502,
            Self::ServiceUnavailable => 503,
            Self::GatewayTimeout => 504,
            Self::HTTPVersionNotSupported => 505,
            Self::Other(code) => *code,
        }
    }

    /// 2xx
    #[inline]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.as_u16())
    }

    /// Canonical reason phrase written on the status line
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Continue => "Continue",
            Self::SwitchingProtocols => "Switching Protocols",
            Self::r#Ok => "OK",
            Self::Created => "Created",
            Self::Accepted => "Accepted",
            Self::NonAuthoritativeInformation => "Non-Authoritative Information",
            Self::NoContent => "No Content",
            Self::ResetContent => "Reset Content",
            Self::PartialContent => "Partial Content",
            Self::MultipleChoices => "Multiple Choices",
            Self::MovedPermanently => "Moved Permanently",
            Self::Found => "Found",
            Self::SeeOther => "See Other",
            Self::NotModified => "Not Modified",
            Self::UseProxy => "Use Proxy",
            Self::TemporaryRedirect => "Temporary Redirect",
            Self::PermanentRedirect => "Permanent Redirect",
            Self::BadRequest => "Bad Request",
            Self::Unauthorized => "Unauthorized",
            Self::PaymentRequired => "Payment Required",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::NotAcceptable => "Not Acceptable",
            Self::ProxyAuthenticationRequired => "Proxy Authentication Required",
            Self::RequestTimeout => "Request Timeout",
            Self::Conflict => "Conflict",
            Self::Gone => "Gone",
            Self::LengthRequired => "Length Required",
            Self::PreconditionFailed => "Precondition Failed",
            Self::ContentTooLarge => "Content Too Large",
            Self::UriTooLong => "URI Too Long",
            Self::UnsupportedMediaType => "Unsupported Media Type",
            Self::RangeNotSatisfiable => "Range Not Satisfiable",
            Self::ExpectationFailed => "Expectation Failed",
            Self::MisdirectedRequest => "Misdirected Request",
            Self::UnprocessableContent => "Unprocessable Content",
            Self::UpgradeRequired => "Upgrade Required",
            Self::TooManyRequests => "Too Many Requests",
            Self::InternalServerError => "Internal Server Error",
            Self::NotImplemented => "Not Implemented",
            Self::BadGateway => "Bad Gateway",
            Self::ServiceUnavailable => "Service Unavailable",
            Self::GatewayTimeout => "Gateway Timeout",
            Self::HTTPVersionNotSupported => "HTTP Version Not Supported",
            Self::Other(_) => "",
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}", self.as_u16()))
    }
}

impl TryFrom<u16> for Status {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            100 => Self::Continue,
            101 => Self::SwitchingProtocols,
            200 => Self::r#Ok,
            201 => Self::Created,
            202 => Self::Accepted,
            203 => Self::NonAuthoritativeInformation,
            204 => Self::NoContent,
            205 => Self::ResetContent,
            206 => Self::PartialContent,
            300 => Self::MultipleChoices,
            301 => Self::MovedPermanently,
            302 => Self::Found,
            303 => Self::SeeOther,
            304 => Self::NotModified,
            305 => Self::UseProxy,
            307 => Self::TemporaryRedirect,
            308 => Self::PermanentRedirect,
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            402 => Self::PaymentRequired,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            405 => Self::MethodNotAllowed,
            406 => Self::NotAcceptable,
            407 => Self::ProxyAuthenticationRequired,
            408 => Self::RequestTimeout,
            409 => Self::Conflict,
            410 => Self::Gone,
            411 => Self::LengthRequired,
            412 => Self::PreconditionFailed,
            413 => Self::ContentTooLarge,
            414 => Self::UriTooLong,
            415 => Self::UnsupportedMediaType,
            416 => Self::RangeNotSatisfiable,
            417 => Self::ExpectationFailed,
            421 => Self::MisdirectedRequest,
            422 => Self::UnprocessableContent,
            426 => Self::UpgradeRequired,
            429 => Self::TooManyRequests,
            500 => Self::InternalServerError,
            501 => Self::NotImplemented,
            502 => Self::BadGateway,
            503 => Self::ServiceUnavailable,
            504 => Self::GatewayTimeout,
            505 => Self::HTTPVersionNotSupported,
            other @ 100..=999 => Self::Other(other),
            other => return Err(Error::Protocol(format!("invalid status code {other}"))),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_displays_code() {
        assert_eq!("404", Status::NotFound.to_string());
    }

    #[test]
    fn status_try_from_known_code() {
        assert_eq!(Status::ContentTooLarge, Status::try_from(413).unwrap());
    }

    #[test]
    fn status_try_from_unlisted_code_is_kept() {
        assert_eq!(Status::Other(418), Status::try_from(418).unwrap());
        assert_eq!(299, Status::try_from(299).unwrap().as_u16());
        assert_eq!("451", Status::Other(451).to_string());
    }

    #[test]
    fn status_try_from_out_of_range_fails() {
        assert!(Status::try_from(99).is_err());
        assert!(Status::try_from(1000).is_err());
    }

    #[test]
    fn status_success_range() {
        assert!(Status::NoContent.is_success());
        assert!(!Status::NotFound.is_success());
        assert!(!Status::InternalServerError.is_success());
    }
}
