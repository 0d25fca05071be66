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

//! Representation of the HTTP version

use std::fmt::Display;

use crate::error::Error;

/// HTTP/1.x version carried on the request and status lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Version {
    /// HTTP/1.0
    H1_0,
    /// HTTP/1.1
    #[default]
    H1_1,
}

impl Version {
    /// Whether connections default to persistent for this version
    pub fn keeps_alive(&self) -> bool {
        matches!(self, Self::H1_1)
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::H1_0 => "HTTP/1.0",
            Self::H1_1 => "HTTP/1.1",
        })
    }
}

impl TryFrom<&[u8]> for Version {
    type Error = Error;

    #[inline]
    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        match value {
            b"HTTP/1.0" => Ok(Self::H1_0),
            b"HTTP/1.1" => Ok(Self::H1_1),
            _ => Err(Error::Protocol(String::from("unsupported HTTP version"))),
        }
    }
}

// httparse reports the minor version only
impl TryFrom<u8> for Version {
    type Error = Error;

    #[inline]
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::H1_0),
            1 => Ok(Self::H1_1),
            _ => Err(Error::Protocol(format!("unsupported HTTP/1.{value}"))),
        }
    }
}
