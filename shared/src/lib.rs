/*!
# Shared Types and Utilities

Wire protocol and pointing math for the antenna mount controller, free of
any I/O so every piece can be tested on its own.

## Core Types

- [`Command`] - Domain commands sent to the mount controller
- [`Frame`] - Header / code / payload / terminator request frame
- [`DevicePosition`] - Servo-frame pointing angles
- [`HeadingFilter`] - Exponentially smoothed compass heading

## Modules

- [`frame`] - Frame encoding and response validation
- [`geometry`] - Mount geometry and pulse width mapping
- [`heading`] - Heading smoothing
- [`error`] - Common error types
*/

pub mod error;
pub mod frame;
pub mod geometry;
pub mod heading;

// Re-export commonly used types
pub use error::{ProtocolError, Result};
pub use frame::{Command, CommandCode, Frame, SensorReading, Tracking};
pub use geometry::{DevicePosition, MountCalibration, TrackingMode};
pub use heading::HeadingFilter;

/// Version information for the shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants
pub mod protocol {
    /// First byte of every frame and every response
    pub const HEADER: u8 = b'\n';

    /// Last byte of every frame and of the sensor response
    pub const TERMINATOR: u8 = 0x00;

    /// Serial line rate
    pub const BAUD_RATE: u32 = 57_600;

    /// Per-read timeout in milliseconds
    pub const READ_TIMEOUT_MS: u64 = 1_000;

    /// Width of the device's text fields
    pub const MAX_TEXT_LEN: usize = 21;

    /// Largest payload a single frame may carry
    pub const MAX_PAYLOAD_LEN: usize = MAX_TEXT_LEN;

    /// Acknowledgement size for every command except the sensor query
    pub const ACK_LEN: usize = 2;

    /// Upper bound on the whole sensor response, header included
    pub const SENSOR_RESPONSE_MAX: usize = 15;

    /// Servo pulse width at 0 degrees (microseconds)
    pub const PULSE_MIN_US: u16 = 544;

    /// Servo pulse width at 180 degrees (microseconds)
    pub const PULSE_MAX_US: u16 = 2400;

    /// Lowest elevation the mount is allowed to reach
    pub const MIN_DEVICE_ELEVATION: f64 = 20.0;

    /// Highest elevation the servo can reach
    pub const MAX_DEVICE_ELEVATION: f64 = 180.0;
}
