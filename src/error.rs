//! Error types for the DNP3 outstation stack.

use thiserror::Error;

/// Result type alias for DNP3 operations.
pub type Result<T> = std::result::Result<T, Dnp3Error>;

/// DNP3 stack error types.
///
/// Most channel and outstation operations report failure as `bool` or
/// `Option`; these errors cover construction and the operations whose
/// failure must be surfaced explicitly.
#[derive(Debug, Error)]
pub enum Dnp3Error {
    /// Masters cannot be created on a shared server channel
    #[error("Master role is not supported on a shared channel")]
    NoMasterSupport,

    /// The owning object has begun shutdown
    #[error("Shutdown in progress")]
    ShuttingDown,

    /// The executor thread no longer accepts tasks
    #[error("Executor stopped")]
    ExecutorStopped,

    /// Listener could not bind its local endpoint
    #[error("Unable to bind {endpoint}: {source}")]
    UnableToBind {
        /// Endpoint that was requested
        endpoint: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Endpoint string could not be resolved to a socket address
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Configuration error
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// TLS setup error
    #[cfg(feature = "tls")]
    #[error("TLS error: {0}")]
    Tls(String),
}

impl Dnp3Error {
    /// Create an invalid configuration error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an invalid endpoint error.
    pub fn invalid_endpoint(msg: impl Into<String>) -> Self {
        Self::InvalidEndpoint(msg.into())
    }

    /// Create a TLS error.
    #[cfg(feature = "tls")]
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Check if this error was caused by a shutdown race.
    pub fn is_shutdown_error(&self) -> bool {
        matches!(self, Self::ShuttingDown | Self::ExecutorStopped)
    }

    /// Check if this error comes from bad user configuration.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::InvalidEndpoint(_) | Self::InvalidConfig(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Dnp3Error::NoMasterSupport;
        assert_eq!(
            err.to_string(),
            "Master role is not supported on a shared channel"
        );

        let err = Dnp3Error::ExecutorStopped;
        assert_eq!(err.to_string(), "Executor stopped");

        let err = Dnp3Error::invalid_endpoint("nowhere:99999");
        assert_eq!(err.to_string(), "Invalid endpoint: nowhere:99999");
    }

    #[test]
    fn test_is_shutdown_error() {
        assert!(Dnp3Error::ShuttingDown.is_shutdown_error());
        assert!(Dnp3Error::ExecutorStopped.is_shutdown_error());
        assert!(!Dnp3Error::NoMasterSupport.is_shutdown_error());
    }

    #[test]
    fn test_is_configuration_error() {
        assert!(Dnp3Error::invalid_config("bad").is_configuration_error());
        assert!(Dnp3Error::invalid_endpoint("bad").is_configuration_error());
        assert!(!Dnp3Error::ShuttingDown.is_configuration_error());
    }
}
