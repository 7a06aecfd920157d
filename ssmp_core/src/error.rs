//! Unified error handling for SSMP
//!
//! Only setup and teardown report errors. Once `mem_init` has returned, the
//! send/receive/barrier primitives are unconditional and never fail; the one
//! exception is `recv_from_big`, which reports a chunk written by an
//! unexpected sender.

use thiserror::Error;

/// Main error type for SSMP operations
#[derive(Debug, Error)]
pub enum SsmpError {
    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parsing or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shared memory creation, sizing or mapping errors
    #[error("Memory error: {0}")]
    Memory(String),

    /// An existing shared region was laid out for a different run
    #[error("Shared region '{name}' layout mismatch: {message}")]
    LayoutMismatch { name: String, message: String },

    /// The topology maps an endpoint onto a core the machine does not have
    #[error("Insufficient cores: endpoint {endpoint} needs core {core}, only {available} online")]
    InsufficientCores {
        endpoint: u32,
        core: usize,
        available: usize,
    },

    /// CPU pinning failed
    #[error("Affinity error: {0}")]
    Affinity(String),

    /// Invalid input/argument errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Attaching to a region whose creator never finished laying it out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// A peer broke the transfer protocol (e.g. overlapping bulk transfers)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operation not supported on this platform
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Internal errors with source location for debugging.
    /// Use the `ssmp_internal!()` macro to create these.
    #[error("Internal error: {message} (at {file}:{line})")]
    Internal {
        message: String,
        file: &'static str,
        line: u32,
    },
}

/// Create an internal error with automatic file/line capture.
///
/// ```rust,ignore
/// use ssmp_core::ssmp_internal;
/// return Err(ssmp_internal!("Unexpected state: {:?}", state));
/// ```
#[macro_export]
macro_rules! ssmp_internal {
    ($($arg:tt)*) => {
        $crate::error::SsmpError::Internal {
            message: format!($($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Convenience type alias for Results using SsmpError
pub type SsmpResult<T> = std::result::Result<T, SsmpError>;

impl From<serde_yaml::Error> for SsmpError {
    fn from(err: serde_yaml::Error) -> Self {
        SsmpError::Config(format!("YAML error: {}", err))
    }
}

impl From<toml::de::Error> for SsmpError {
    fn from(err: toml::de::Error) -> Self {
        SsmpError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<std::num::ParseIntError> for SsmpError {
    fn from(err: std::num::ParseIntError) -> Self {
        SsmpError::Config(format!("Integer parse error: {}", err))
    }
}

// Helper methods
impl SsmpError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        SsmpError::Config(msg.into())
    }

    /// Create a memory error
    pub fn memory<S: Into<String>>(msg: S) -> Self {
        SsmpError::Memory(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        SsmpError::InvalidInput(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        SsmpError::Protocol(msg.into())
    }

    /// Create a layout mismatch error for the named region
    pub fn layout_mismatch<S: Into<String>, T: Into<String>>(name: S, message: T) -> Self {
        SsmpError::LayoutMismatch {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Setup errors leave a half-initialized region behind; nothing can retry them.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SsmpError::Protocol(_))
    }
}

/// Terminate the process on a fatal setup error.
///
/// A half-initialized shared region corrupts every other endpoint's view, so
/// client programs print a diagnostic and exit non-zero instead of retrying.
pub trait OrExit<T> {
    fn or_exit(self, context: &str) -> T;
}

impl<T> OrExit<T> for SsmpResult<T> {
    fn or_exit(self, context: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                log::error!("{}: {}", context, err);
                eprintln!("ssmp: {}: {}", context, err);
                std::process::exit(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_macro_captures_location() {
        let err = ssmp_internal!("bad state {}", 7);
        match err {
            SsmpError::Internal { message, file, line } => {
                assert_eq!(message, "bad state 7");
                assert!(file.ends_with("error.rs"));
                assert!(line > 0);
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn only_protocol_errors_are_recoverable() {
        assert!(!SsmpError::protocol("overlap").is_fatal());
        assert!(SsmpError::memory("mmap").is_fatal());
        assert!(SsmpError::layout_mismatch("/x", "version").is_fatal());
    }

    #[test]
    fn display_includes_context() {
        let err = SsmpError::InsufficientCores {
            endpoint: 3,
            core: 12,
            available: 8,
        };
        let text = err.to_string();
        assert!(text.contains("endpoint 3"));
        assert!(text.contains("core 12"));
    }
}
