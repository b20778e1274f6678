//! Http Status Codes
//! [RFC 9110 Section 15](https://www.rfc-editor.org/rfc/rfc9110#section-15)

use std::fmt::Display;

/// Http Status Codes
/// [RFC 9110 Section 15](https://www.rfc-editor.org/rfc/rfc9110#section-15)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// 15.3.1
    r#Ok = 200,
    /// 15.5.1
    BadRequest = 400,
    /// 15.5.4
    Forbidden = 403,
    /// 15.5.5
    NotFound = 404,
    /// 15.6.2
    NotImplemented = 501,
    /// 15.6.4
    ServiceUnavailable = 503,
}

impl Status {
    /// The numeric status code, e.g. `200`.
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// The RFC 9110 reason phrase, e.g. `"OK"` for 200.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            Self::r#Ok => "OK",
            Self::BadRequest => "Bad Request",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::NotImplemented => "Not Implemented",
            Self::ServiceUnavailable => "Service Unavailable",
        }
    }

    /// `true` for 200–299, counted under [`crate::stats::Snapshot::status_2xx`].
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code())
    }

    /// `true` for 400–499, counted under [`crate::stats::Snapshot::status_4xx`].
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.code())
    }

    /// `true` for 500–599, counted under [`crate::stats::Snapshot::status_5xx`].
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.code())
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{} {}", self.code(), self.reason_phrase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_status_classes() {
        assert!(Status::Ok.is_success());
        assert!(Status::NotFound.is_client_error());
        assert!(Status::ServiceUnavailable.is_server_error());
        assert!(!Status::Ok.is_client_error());
    }

    #[test]
    fn displays_code_and_reason() {
        assert_eq!(Status::NotFound.to_string(), "404 Not Found");
    }
}
