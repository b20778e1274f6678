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

//! Request-line parsing for HTTP/1.x.
//!
//! Deliberately narrow: the handler state machine (see [`crate::handler`])
//! only needs the method, target, and version off the first line, plus a
//! `Host` header for optional vhost-directory resolution. Full header
//! parsing isn't attempted — headers are scanned far enough to find the
//! blank line that ends them and are otherwise discarded.

pub mod method;
mod raw_request;
pub mod request;
pub mod status;
pub mod version;

pub use method::Method;
pub use raw_request::RawRequest;
pub use status::Status;
pub use version::Version;

use std::fmt::Display;

/// Failures encountered while parsing a request line or headers.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Invalid or unsupported byte sequence in the method.
    Method,
    /// Invalid byte in the request target, or no target present.
    Target,
    /// Invalid or unsupported HTTP version.
    Version,
    /// Request line (or headers) did not end in the expected `CRLF`.
    NewLine,
    /// Request did not arrive within the configured byte budget.
    Incomplete,
}

impl ParseError {
    fn description_str(&self) -> &'static str {
        match *self {
            ParseError::Method => "invalid or unsupported method",
            ParseError::Target => "invalid request target",
            ParseError::Version => "invalid or unsupported HTTP version",
            ParseError::NewLine => "invalid or missing CRLF",
            ParseError::Incomplete => "request line incomplete",
        }
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description_str())
    }
}

impl std::error::Error for ParseError {}

/// Result whose `Err` variant is [`ParseError`].
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Consumes the `CRLF` that terminates the current line, failing if the next
/// two bytes are anything else.
#[inline]
pub(crate) fn take_after_newline(buf: &mut RawRequest<'_>) -> ParseResult<()> {
    match (buf.next(), buf.next()) {
        (Some(&b'\r'), Some(&b'\n')) => {
            buf.slice();
            Ok(())
        }
        _ => Err(ParseError::NewLine),
    }
}
