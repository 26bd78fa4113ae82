//! Error types for strait

use thiserror::Error;

/// Result type for strait operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for strait
///
/// Every variant that can escape a command handler maps onto a WebDriver
/// BiDi error code via [`Error::code`]. Internal variants (transport,
/// serialization) are reported to the client as `unknown error`.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed command, parameter, or envelope
    #[error("{0}")]
    InvalidArgument(String),

    /// Referenced browsing context does not exist
    #[error("Context {0} not found")]
    NoSuchFrame(String),

    /// Referenced remote object handle does not exist
    #[error("Handle {0} not found")]
    NoSuchHandle(String),

    /// Referenced node does not exist
    #[error("Node {0} not found")]
    NoSuchNode(String),

    /// No realm matched the given filter
    #[error("No realm found matching {0}")]
    NoSuchRealm(String),

    /// Referenced preload script does not exist
    #[error("No preload script with id {0}")]
    NoSuchScript(String),

    /// Unrecognized command method
    #[error("Unknown command {0}")]
    UnknownCommand(String),

    /// Catch-all for unexpected failures, including translated CDP errors
    #[error("{0}")]
    Unknown(String),

    /// Recognized but unimplemented behavior
    #[error("{0}")]
    UnsupportedOperation(String),

    /// Screenshot capture failed
    #[error("Unable to capture screenshot: {0}")]
    UnableToCaptureScreen(String),

    /// CDP returned an error response
    #[error("CDP error in {method}: {message} (code {code})")]
    Cdp {
        method: String,
        code: i64,
        message: String,
    },

    /// The CDP transport closed while a request was pending
    #[error("CDP transport disconnected")]
    Disconnected,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create an unknown error
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown(message.into())
    }

    /// Create a CDP error with full context
    pub fn cdp(method: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self::Cdp {
            method: method.into(),
            code,
            message: message.into(),
        }
    }

    /// The BiDi wire code for this error
    pub fn code(&self) -> &'static str {
        match self {
            // The realm filter is command input, so a miss is an argument
            // problem on the wire.
            Error::InvalidArgument(_) | Error::NoSuchRealm(_) => "invalid argument",
            Error::NoSuchFrame(_) => "no such frame",
            Error::NoSuchHandle(_) => "no such handle",
            Error::NoSuchNode(_) => "no such node",
            Error::NoSuchScript(_) => "no such script",
            Error::UnknownCommand(_) => "unknown command",
            Error::UnsupportedOperation(_) => "unsupported operation",
            Error::UnableToCaptureScreen(_) => "unable to capture screen",
            Error::Unknown(_)
            | Error::Cdp { .. }
            | Error::Disconnected
            | Error::Serialization(_) => "unknown error",
        }
    }

    /// Check if this is the CDP "Invalid remote object id" error, which is
    /// swallowed when releasing handles that the browser already collected.
    pub fn is_stale_object_id(&self) -> bool {
        match self {
            Error::Cdp { code, message, .. } => {
                *code == -32000 && message.contains("Invalid remote object id")
            }
            _ => false,
        }
    }

    /// Check if this CDP error means the target or session is gone
    pub fn is_target_gone(&self) -> bool {
        match self {
            Error::Cdp { message, .. } => {
                message.contains("Session with given id not found")
                    || message.contains("Target closed")
                    || message.contains("No target with given id")
            }
            Error::Disconnected => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes() {
        assert_eq!(Error::invalid_argument("x").code(), "invalid argument");
        assert_eq!(Error::NoSuchFrame("C1".into()).code(), "no such frame");
        assert_eq!(Error::NoSuchRealm("{}".into()).code(), "invalid argument");
        assert_eq!(
            Error::cdp("Page.navigate", -32000, "boom").code(),
            "unknown error"
        );
        assert_eq!(Error::Disconnected.code(), "unknown error");
    }

    #[test]
    fn test_stale_object_id_detection() {
        let stale = Error::cdp("Runtime.releaseObject", -32000, "Invalid remote object id");
        assert!(stale.is_stale_object_id());
        let other = Error::cdp("Runtime.releaseObject", -32000, "Some other failure");
        assert!(!other.is_stale_object_id());
        assert!(!Error::Disconnected.is_stale_object_id());
    }
}
