//! Representation of HTTP method
use std::fmt::Display;

use super::ParseError;

/// Representation of the requested HTTP Method
/// [IETF RFC 9110 Section 9](https://www.rfc-editor.org/rfc/rfc9110#section-9)
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Method {
    /// RFC 9110 9.3.1
    Get,
    /// RFC 9110 9.3.2
    Head,
    /// RFC 9110 9.3.3
    Post,
    /// RFC 9110 9.3.4
    Put,
    /// RFC 9110 9.3.5
    Delete,
    /// RFC 9110 9.3.6
    Connect,
    /// RFC 9110 9.3.7
    Options,
    /// RFC 9110 9.3.8
    Trace,
}

impl Method {
    /// Parses a method token, the first space-delimited word of a request line.
    ///
    /// Only `GET` and `HEAD` are ever routed to file serving; every other
    /// recognized method still parses successfully
    /// so the handler can answer it with `501 Not Implemented` rather than
    /// `400 Bad Request`.
    pub fn parse(token: &[u8]) -> Result<Self, ParseError> {
        match token {
            b"GET" => Ok(Self::Get),
            b"HEAD" => Ok(Self::Head),
            b"POST" => Ok(Self::Post),
            b"PUT" => Ok(Self::Put),
            b"DELETE" => Ok(Self::Delete),
            b"CONNECT" => Ok(Self::Connect),
            b"OPTIONS" => Ok(Self::Options),
            b"TRACE" => Ok(Self::Trace),
            _ => Err(ParseError::Method),
        }
    }

    /// `true` for the only two methods this server serves files for.
    pub fn is_servable(&self) -> bool {
        matches!(self, Self::Get | Self::Head)
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_methods() {
        assert_eq!(Method::parse(b"GET"), Ok(Method::Get));
        assert_eq!(Method::parse(b"HEAD"), Ok(Method::Head));
        assert_eq!(Method::parse(b"POST"), Ok(Method::Post));
    }

    #[test]
    fn rejects_unknown_method() {
        assert_eq!(Method::parse(b"FROB"), Err(ParseError::Method));
        assert_eq!(Method::parse(b"get"), Err(ParseError::Method));
    }

    #[test]
    fn only_get_and_head_are_servable() {
        assert!(Method::Get.is_servable());
        assert!(Method::Head.is_servable());
        assert!(!Method::Post.is_servable());
        assert!(!Method::Delete.is_servable());
    }
}
