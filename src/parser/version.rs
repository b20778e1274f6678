//! Representation of the requested HTTP version

use std::fmt::Display;

use super::ParseError;

/// Representation of the requested HTTP version.
///
/// Only the two versions this server answers are representable; a bare
/// `HTTP/2` or `HTTP/3` request line fails to parse with [`ParseError::Version`]
/// rather than succeeding as an unservable variant — this server never
/// negotiates or routes anything beyond HTTP/1.x.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Version {
    /// HTTP/1.0
    H1_0,
    /// HTTP/1.1
    H1_1,
}

impl Version {
    /// Parses the version token following `HTTP/`, i.e. the bytes `1.0` or `1.1`.
    pub fn parse(major: u8, minor: Option<u8>) -> Result<Self, ParseError> {
        match (major, minor) {
            (b'1', Some(b'0')) => Ok(Self::H1_0),
            (b'1', Some(b'1')) => Ok(Self::H1_1),
            _ => Err(ParseError::Version),
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_http_1_1() {
        assert_eq!(Version::parse(b'1', Some(b'1')), Ok(Version::H1_1));
    }

    #[test]
    fn parses_http_1_0() {
        assert_eq!(Version::parse(b'1', Some(b'0')), Ok(Version::H1_0));
    }

    #[test]
    fn rejects_garbage_minor_version() {
        assert_eq!(Version::parse(b'1', Some(b'9')), Err(ParseError::Version));
    }
}
