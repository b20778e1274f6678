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

//! HTTP/1.x request line parsing.

use core::str::from_utf8_unchecked;

use super::{take_after_newline, Method, ParseError, ParseResult, RawRequest, Version};

/// Returns `true` if `b` is a valid octet for a request-target token.
///
/// This is deliberately permissive (anything but whitespace and control
/// bytes) — full `RFC 3986` validation isn't attempted here. The target is
/// still percent-encoded at this point; [`crate::handler`] decodes it and
/// runs the traversal check against the decoded string.
#[inline]
fn is_request_target_token(b: u8) -> bool {
    b > 0x20 && b != 0x7f
}

/// A parsed HTTP/1.x request line: method, target, and version.
///
/// Headers are not retained — only the `Host` header's value, if present, is
/// extracted for the optional per-host document root prefix.
#[derive(Debug, PartialEq, Eq)]
pub struct RequestLine<'buf> {
    /// The request method.
    pub method: Method,
    /// The raw (not yet percent-decoded) request target, e.g. `/index.html`.
    pub target: &'buf str,
    /// The declared protocol version.
    pub version: Version,
}

impl<'buf> RequestLine<'buf> {
    /// Parses a request line of the exact form `METHOD SP TARGET SP VERSION CRLF`,
    /// then consumes header lines up to and including the blank line that ends
    /// them, without retaining their contents.
    ///
    /// Returns the request line and the `Host` header's value, if one was
    /// present among the discarded headers.
    pub fn parse(buf: &'buf [u8]) -> ParseResult<(Self, Option<&'buf str>)> {
        let mut req = RawRequest::new(buf);

        let method = parse_method(&mut req)?;
        let target = parse_target(&mut req)?;
        let version = parse_version(&mut req)?;
        take_after_newline(&mut req)?;

        let host = parse_headers(&mut req)?;

        Ok((
            RequestLine {
                method,
                target,
                version,
            },
            host,
        ))
    }
}

fn parse_method<'b>(buf: &mut RawRequest<'b>) -> ParseResult<Method> {
    let token = buf.take_until(|b| b == b' ').ok_or(ParseError::Method)?;
    Method::parse(token)
}

fn parse_target<'b>(buf: &mut RawRequest<'b>) -> ParseResult<&'b str> {
    // `parse_method` leaves the single SP that follows the method token
    // un-consumed (it only scans up to it); eat that separator first so
    // the target scan below starts on the target's own first byte.
    if buf.next() != Some(&b' ') {
        return Err(ParseError::Target);
    }
    buf.slice();

    let token = buf.take_until(|b| b == b' ').ok_or(ParseError::Target)?;
    if !token.iter().copied().all(is_request_target_token) {
        return Err(ParseError::Target);
    }

    // SAFETY: every byte in `token` passed `is_request_target_token`, which excludes
    // all bytes >= 0x80 that would be part of a multi-byte UTF-8 sequence — the slice
    // is therefore pure ASCII and trivially valid UTF-8.
    Ok(unsafe { from_utf8_unchecked(token) })
}

fn parse_version(buf: &mut RawRequest<'_>) -> ParseResult<Version> {
    // likewise eat the SP left un-consumed by `parse_target`'s take_until.
    if buf.next() != Some(&b' ') {
        return Err(ParseError::Version);
    }
    buf.slice();

    let has_prefix = buf.as_ref().starts_with(b"HTTP/");
    if has_prefix {
        buf.advance(5);
        let major = buf.next().copied().ok_or(ParseError::Version)?;
        let minor = if major == b'1' {
            if buf.next() != Some(&b'.') {
                return Err(ParseError::Version);
            }
            Some(buf.next().copied().ok_or(ParseError::Version)?)
        } else {
            None
        };

        let version = Version::parse(major, minor)?;
        buf.slice();
        Ok(version)
    } else {
        Err(ParseError::Version)
    }
}

/// Consumes header lines until the blank line, returning the `Host` header's
/// value if one was seen. Header names are matched case-insensitively;
/// values are neither validated nor folded.
fn parse_headers<'b>(buf: &mut RawRequest<'b>) -> ParseResult<Option<&'b str>> {
    let mut host = None;

    loop {
        if buf.is_empty() {
            return Err(ParseError::NewLine);
        }

        // blank line: CRLF immediately.
        if buf.peek() == Some(b'\r') {
            take_after_newline(buf)?;
            return Ok(host);
        }

        let name = buf
            .take_until(|b| b == b':')
            .ok_or(ParseError::NewLine)?;
        buf.next(); // consume ':'

        while buf.peek() == Some(b' ') || buf.peek() == Some(b'\t') {
            buf.next();
        }
        buf.slice();

        let value = buf.take_until(|b| b == b'\r').unwrap_or_default();
        take_after_newline(buf)?;

        if host.is_none() && name.eq_ignore_ascii_case(b"host") {
            // SAFETY: header values are bounded by CR, which is < 0x80; any non-ASCII byte
            // inside would still be a valid UTF-8 continuation-free octet sequence is not
            // guaranteed in general, so fall back to None on invalid UTF-8 rather than panic.
            host = std::str::from_utf8(value).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get() {
        let (line, host) = RequestLine::parse(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert_eq!(line.method, Method::Get);
        assert_eq!(line.target, "/");
        assert_eq!(line.version, Version::H1_1);
        assert_eq!(host, Some("x"));
    }

    #[test]
    fn parses_head_with_no_headers() {
        let (line, host) = RequestLine::parse(b"HEAD /foo HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(line.method, Method::Head);
        assert_eq!(line.target, "/foo");
        assert_eq!(host, None);
    }

    #[test]
    fn extracts_host_header_case_insensitively() {
        let (_, host) =
            RequestLine::parse(b"GET / HTTP/1.1\r\nHOST: example.com\r\n\r\n").unwrap();
        assert_eq!(host, Some("example.com"));
    }

    #[test]
    fn rejects_missing_version() {
        // no SP follows the target, so the target scan runs off the end of
        // the buffer looking for one — surfaces as a target error rather
        // than a version error, since the two can't be told apart once the
        // scan has already consumed the rest of the input.
        assert_eq!(
            RequestLine::parse(b"GET /\r\n\r\n").unwrap_err(),
            ParseError::Target
        );
    }

    #[test]
    fn rejects_lowercase_method() {
        assert_eq!(
            RequestLine::parse(b"get / HTTP/1.1\r\n\r\n").unwrap_err(),
            ParseError::Method
        );
    }

    #[test]
    fn rejects_missing_target() {
        assert_eq!(
            RequestLine::parse(b"GET  HTTP/1.1\r\n\r\n").unwrap_err(),
            ParseError::Target
        );
    }

    #[test]
    fn rejects_unterminated_request_line() {
        assert_eq!(
            RequestLine::parse(b"GET / HTTP/1.1").unwrap_err(),
            ParseError::NewLine
        );
    }

    #[test]
    fn rejects_http_2_request_line() {
        // not a supported version for this server; still a well-formed line.
        assert_eq!(
            RequestLine::parse(b"GET / HTTP/2\r\n\r\n").unwrap_err(),
            ParseError::Version
        );
    }

    #[test]
    fn skips_headers_other_than_host() {
        let (line, host) = RequestLine::parse(
            b"GET /a HTTP/1.1\r\nUser-Agent: curl\r\nAccept: */*\r\nHost: y\r\n\r\n",
        )
        .unwrap();
        assert_eq!(line.target, "/a");
        assert_eq!(host, Some("y"));
    }
}
