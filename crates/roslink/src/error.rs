// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! Errors returned by roslink operations.

use std::fmt;
use std::io;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by roslink operations.
///
/// Transient transport faults never surface through this type: they are
/// absorbed by the owning link's retry policy and show up only in that
/// link's metrics. What does surface is permanent: protocol violations,
/// registry failures, and operations requested in an illegal state.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Registry / discovery errors
    // ========================================================================
    /// The master registry rejected or failed a request.
    Master(String),
    /// No publication registered under the requested topic name.
    TopicNotFound(String),
    /// Topic already advertised/subscribed with a conflicting type.
    TypeMismatch {
        /// Topic name
        topic: String,
        /// Type already registered
        registered: String,
        /// Type of the conflicting request
        requested: String,
    },

    // ========================================================================
    // Transport errors
    // ========================================================================
    /// I/O error with underlying cause.
    Io(io::Error),
    /// Handshake header rejected (missing field, checksum mismatch, or an
    /// `error=` reply from the peer). Terminal for the link attempt.
    Header(String),
    /// Peer violated the framing protocol (e.g. oversized frame).
    Protocol(String),

    // ========================================================================
    // State errors
    // ========================================================================
    /// Operation requested in a state that does not permit it.
    InvalidState(String),
    /// Entity used after its owner was shut down.
    Shutdown,

    // ========================================================================
    // Data errors
    // ========================================================================
    /// Message buffer could not be decoded as the expected type.
    Decode(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Master(msg) => write!(f, "master registry error: {}", msg),
            Error::TopicNotFound(name) => write!(f, "unknown topic [{}]", name),
            Error::TypeMismatch {
                topic,
                registered,
                requested,
            } => write!(
                f,
                "topic [{}] already registered with type [{}], requested [{}]",
                topic, registered, requested
            ),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Header(msg) => write!(f, "header error: {}", msg),
            Error::Protocol(msg) => write!(f, "protocol violation: {}", msg),
            Error::InvalidState(msg) => write!(f, "invalid state: {}", msg),
            Error::Shutdown => write!(f, "node is shutting down"),
            Error::Decode(msg) => write!(f, "decode error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = Error::TopicNotFound("odom".into());
        assert_eq!(e.to_string(), "unknown topic [odom]");

        let e = Error::TypeMismatch {
            topic: "odom".into(),
            registered: "nav_msgs/Odometry".into(),
            requested: "std_msgs/String".into(),
        };
        assert!(e.to_string().contains("nav_msgs/Odometry"));
    }

    #[test]
    fn test_io_error_source() {
        use std::error::Error as _;
        let e = Error::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(e.source().is_some());
    }
}
