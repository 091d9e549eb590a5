/*!
Common error types for the mount wire protocol.
*/

use thiserror::Error;

/// Common result type used throughout the shared library
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Everything that can go wrong while encoding a frame or validating what
/// the device sent back
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame payload exceeds the device's field width
    #[error("Payload too long: {len} bytes (max {max})")]
    PayloadTooLong { len: usize, max: usize },

    /// Payload contains the frame terminator and would be cut short on the wire
    #[error("Payload contains the frame terminator at offset {0}")]
    TerminatorInPayload(usize),

    /// Command code byte is not one of the known commands
    #[error("Unknown command code: {0:#04x}")]
    UnknownCommandCode(u8),

    /// First byte of a response (or frame) was not the header marker
    #[error("Bad header byte: expected {expected:#04x}, got {actual:#04x}")]
    BadHeader { expected: u8, actual: u8 },

    /// Response length does not match what the exchange requires
    #[error("Unexpected response length: expected {expected} bytes, got {actual}")]
    ResponseLength { expected: usize, actual: usize },

    /// Sensor response ran out of budget before the terminator
    #[error("Sensor response missing terminator after {0} bytes")]
    MissingTerminator(usize),

    /// Sensor payload is not `<int>,<int>`
    #[error("Malformed sensor payload: {0:?}")]
    MalformedSensorPayload(String),

    /// Out-of-range construction parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl ProtocolError {
    /// Create a malformed sensor payload error from raw bytes
    pub fn malformed(payload: &[u8]) -> Self {
        Self::MalformedSensorPayload(String::from_utf8_lossy(payload).into_owned())
    }

    /// True for failures that only mean the device did not answer in time
    pub fn is_missing_response(&self) -> bool {
        matches!(self, Self::ResponseLength { actual: 0, .. })
    }
}
