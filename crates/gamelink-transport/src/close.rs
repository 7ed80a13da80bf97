//! Close codes for the client transport.
//!
//! Every close carries a numeric code the host can show or log. The code
//! also decides what happens next:
//!
//! ```text
//! 2                 → fatal: the transport stops for good
//! 1004, 1005, 1006  → reconnect after a backoff delay
//! anything else     → Disconnected event, transport stays usable
//! ```

use std::fmt;

/// Why a connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The peer spoke something that is not our framing (code 2).
    UnknownProtocol,
    /// The server kicked this client (code 25).
    KickedOut,
    /// A socket error while sending or polling (code 1000).
    SendException,
    /// A correctly framed body failed to decode (code 1001).
    IllegalPackage,
    /// A read or write moved zero bytes: the peer is gone (code 1002).
    ZeroByte,
    /// An expected reply never arrived (code 1003).
    PackageTimeout,
    /// An intermediate proxy timed out (code 1004).
    ProxyTimeout,
    /// The server could not be reached (code 1005).
    FailToConnect,
    /// An intermediate proxy restarted (code 1006).
    ProxyError,
    /// The host is shutting the transport down (code 1007).
    OnDestroy,
    /// Any code this crate does not name.
    Other(i32),
}

impl CloseReason {
    pub fn code(self) -> i32 {
        match self {
            Self::UnknownProtocol => 2,
            Self::KickedOut => 25,
            Self::SendException => 1000,
            Self::IllegalPackage => 1001,
            Self::ZeroByte => 1002,
            Self::PackageTimeout => 1003,
            Self::ProxyTimeout => 1004,
            Self::FailToConnect => 1005,
            Self::ProxyError => 1006,
            Self::OnDestroy => 1007,
            Self::Other(code) => code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            2 => Self::UnknownProtocol,
            25 => Self::KickedOut,
            1000 => Self::SendException,
            1001 => Self::IllegalPackage,
            1002 => Self::ZeroByte,
            1003 => Self::PackageTimeout,
            1004 => Self::ProxyTimeout,
            1005 => Self::FailToConnect,
            1006 => Self::ProxyError,
            1007 => Self::OnDestroy,
            other => Self::Other(other),
        }
    }

    /// Human-readable text carried by the Disconnected event.
    pub fn reason(self) -> &'static str {
        match self {
            Self::UnknownProtocol => "unknown protocol",
            Self::KickedOut => "kicked out by server",
            Self::SendException => "socket error",
            Self::IllegalPackage => "received an illegal package",
            Self::ZeroByte => "connection closed by peer",
            Self::PackageTimeout => "package timeout",
            Self::ProxyTimeout => "proxy timeout",
            Self::FailToConnect => "failed to connect",
            Self::ProxyError => "proxy error",
            Self::OnDestroy => "transport destroyed",
            Self::Other(_) => "connection closed",
        }
    }

    /// The transport halts permanently after this close.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::UnknownProtocol)
    }

    /// The transport schedules a backoff reconnect instead of raising a
    /// Disconnected event.
    pub fn is_reconnect_eligible(self) -> bool {
        matches!(self, Self::ProxyTimeout | Self::FailToConnect | Self::ProxyError)
    }
}

impl From<i32> for CloseReason {
    fn from(code: i32) -> Self {
        Self::from_code(code)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reason(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code_named_codes_round_trip() {
        for code in [2, 25, 1000, 1001, 1002, 1003, 1004, 1005, 1006, 1007] {
            let reason = CloseReason::from_code(code);
            assert!(!matches!(reason, CloseReason::Other(_)), "code {code}");
            assert_eq!(reason.code(), code);
        }
    }

    #[test]
    fn test_from_code_unknown_is_other() {
        assert_eq!(CloseReason::from_code(4242), CloseReason::Other(4242));
        assert_eq!(CloseReason::Other(4242).code(), 4242);
    }

    #[test]
    fn test_classification() {
        assert!(CloseReason::UnknownProtocol.is_fatal());
        assert!(!CloseReason::UnknownProtocol.is_reconnect_eligible());

        for reason in [
            CloseReason::ProxyTimeout,
            CloseReason::FailToConnect,
            CloseReason::ProxyError,
        ] {
            assert!(reason.is_reconnect_eligible());
            assert!(!reason.is_fatal());
        }

        for reason in [
            CloseReason::KickedOut,
            CloseReason::ZeroByte,
            CloseReason::OnDestroy,
            CloseReason::Other(7),
        ] {
            assert!(!reason.is_fatal());
            assert!(!reason.is_reconnect_eligible());
        }
    }

    #[test]
    fn test_display_includes_code() {
        assert_eq!(
            CloseReason::ZeroByte.to_string(),
            "connection closed by peer (1002)"
        );
    }
}
