//! Error types for the multiplexer driver.
//!
//! `MuxError` is the single error type returned by the library. It follows the
//! board's failure taxonomy:
//!
//! - **`Connect`**: the TCP connection could not be established. Fatal when
//!   opening a session.
//! - **`Handshake`**: the board did not answer the version check with a
//!   well-formed frame. Fatal when opening a session.
//! - **`Desync`**: a command that requires a reply got a frame without the
//!   prompt marker. The command stream no longer lines up with the board's
//!   output and nothing in this crate tries to recover from it.
//! - **`UnexpectedResponse`**: the frame was well-formed but its content did
//!   not have the expected shape. The session stays usable.
//!
//! Failures inside the frame reader are not errors at all: they are reported
//! as a [`FrameFault`] on the returned frame so the caller decides whether the
//! condition is fatal.

use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type MuxResult<T> = std::result::Result<T, MuxError>;

/// Errors returned by the driver.
#[derive(Error, Debug)]
pub enum MuxError {
    /// TCP connect to the board failed.
    #[error("Failed to connect to control board at {address}: {source}")]
    Connect {
        /// Address that was dialled.
        address: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// TCP connect did not finish in time.
    #[error("Timed out connecting to control board at {0}")]
    ConnectTimeout(String),

    /// Address is not `host:port`.
    #[error("Invalid board address '{0}', expected host:port")]
    InvalidAddress(String),

    /// Version check did not return a complete frame.
    #[error("Got bad response from control board during version check: {0}")]
    Handshake(FrameFault),

    /// A reply was required but the frame failed.
    #[error("Comms are out of sync with the control board after '{command}': {fault}")]
    Desync {
        /// Command whose reply broke framing.
        command: String,
        /// What went wrong with the frame.
        fault: FrameFault,
    },

    /// Well-formed reply with content of the wrong shape.
    #[error("Unexpected response from control board to '{command}': {response:?}")]
    UnexpectedResponse {
        /// Command that was sent.
        command: String,
        /// Reply text as received.
        response: String,
    },

    /// ADC channel outside 0-7.
    #[error("ADC channel {0} out of range, expected 0-7")]
    InvalidChannel(u8),

    /// Letter is not a substrate slot.
    #[error("Unknown substrate '{0}', expected one of HGFEDCBA")]
    UnknownSubstrate(char),

    /// The session has been closed.
    #[error("Session is closed")]
    SessionClosed,

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration loaded but holds invalid values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MuxError {
    /// Whether the session can keep issuing commands after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MuxError::UnexpectedResponse { .. }
                | MuxError::InvalidChannel(_)
                | MuxError::UnknownSubstrate(_)
        )
    }
}

/// Reason a response frame could not be read cleanly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameFault {
    /// Deadline passed before the frame was complete.
    #[error("no response within {0:?}")]
    Timeout(std::time::Duration),

    /// The board closed or reset the connection.
    #[error("connection closed by board")]
    Closed,

    /// Any other socket error.
    #[error("read failed: {0}")]
    Io(String),

    /// A line ended without `\r\n`.
    #[error("line terminator missing")]
    MissingTerminator,

    /// The bytes after the reply were not the prompt.
    #[error("expected prompt, got {0:?}")]
    MissingPrompt(String),
}

impl From<std::io::Error> for FrameFault {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => FrameFault::Closed,
            _ => FrameFault::Io(err.to_string()),
        }
    }
}
