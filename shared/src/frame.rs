/*!
Command frames exchanged with the mount controller.

Every request is `HEADER + code + payload + TERMINATOR`. The device answers
each frame with a two byte acknowledgement, except for the heading sensor
query which answers with a header byte followed by `"<int>,<int>"` and the
terminator.
*/

use crate::error::{ProtocolError, Result};
use crate::protocol::{ACK_LEN, HEADER, MAX_PAYLOAD_LEN, MAX_TEXT_LEN, TERMINATOR};

/// Command code byte, the second byte of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandCode {
    SetName = b'0',
    SetStatusText = b'1',
    SetTracking = b'2',
    QueryHeadingSensor = b'3',
}

impl CommandCode {
    /// Parse a command code from its wire byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            b'0' => Some(Self::SetName),
            b'1' => Some(Self::SetStatusText),
            b'2' => Some(Self::SetTracking),
            b'3' => Some(Self::QueryHeadingSensor),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A single request frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub code: CommandCode,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame, rejecting payloads the device cannot accept
    pub fn new(code: CommandCode, payload: impl Into<Vec<u8>>) -> Result<Self> {
        let payload = payload.into();

        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLong {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }

        if let Some(offset) = payload.iter().position(|&b| b == TERMINATOR) {
            return Err(ProtocolError::TerminatorInPayload(offset));
        }

        Ok(Self { code, payload })
    }

    /// Encode the frame for the wire
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.wire_len());
        bytes.push(HEADER);
        bytes.push(self.code.as_u8());
        bytes.extend_from_slice(&self.payload);
        bytes.push(TERMINATOR);
        bytes
    }

    /// Decode one complete frame, as the device would see it
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 3 {
            return Err(ProtocolError::ResponseLength {
                expected: 3,
                actual: bytes.len(),
            });
        }

        if bytes[0] != HEADER {
            return Err(ProtocolError::BadHeader {
                expected: HEADER,
                actual: bytes[0],
            });
        }

        let code = CommandCode::from_u8(bytes[1])
            .ok_or(ProtocolError::UnknownCommandCode(bytes[1]))?;

        let last = bytes.len() - 1;
        if bytes[last] != TERMINATOR {
            return Err(ProtocolError::MissingTerminator(bytes.len()));
        }

        Self::new(code, &bytes[2..last])
    }

    /// Number of bytes this frame occupies on the wire
    pub fn wire_len(&self) -> usize {
        self.payload.len() + 3
    }
}

/// Tracking state pushed to the actuators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tracking {
    Disabled,
    Enabled { azimuth_pulse: u16, elevation_pulse: u16 },
}

/// Domain commands understood by the mount controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetName(String),
    SetStatusText(String),
    SetTracking(Tracking),
    QueryHeadingSensor,
}

impl Command {
    /// Target name, centred in the display field
    pub fn set_name(text: &str) -> Self {
        Self::SetName(center_text(text, MAX_TEXT_LEN))
    }

    /// Free-form status line (countdown, fallback message)
    pub fn set_status_text(text: &str) -> Self {
        Self::SetStatusText(display_text(text, MAX_TEXT_LEN))
    }

    pub fn set_tracking(tracking: Tracking) -> Self {
        Self::SetTracking(tracking)
    }

    /// Frames to send for this command, in order. Each one is acknowledged
    /// separately.
    pub fn frames(&self) -> Result<Vec<Frame>> {
        match self {
            Self::SetName(text) => Ok(vec![Frame::new(CommandCode::SetName, text.as_bytes())?]),
            Self::SetStatusText(text) => {
                Ok(vec![Frame::new(CommandCode::SetStatusText, text.as_bytes())?])
            }
            Self::SetTracking(Tracking::Disabled) => {
                Ok(vec![Frame::new(CommandCode::SetTracking, b"0".to_vec())?])
            }
            Self::SetTracking(Tracking::Enabled { azimuth_pulse, elevation_pulse }) => Ok(vec![
                Frame::new(CommandCode::SetTracking, format!("a{}", azimuth_pulse))?,
                Frame::new(CommandCode::SetTracking, format!("e{}", elevation_pulse))?,
            ]),
            Self::QueryHeadingSensor => Ok(vec![Frame::new(CommandCode::QueryHeadingSensor, Vec::new())?]),
        }
    }

    /// Whether the device answers this command with a two byte acknowledgement
    pub fn expects_ack(&self) -> bool {
        !matches!(self, Self::QueryHeadingSensor)
    }
}

/// Reduce text to what the display can show: printable ASCII, at most
/// `width` characters
fn display_text(text: &str, width: usize) -> String {
    text.chars()
        .filter(|c| *c != '\0')
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .take(width)
        .collect()
}

/// Pad with `(width - len) / 2` spaces on each side. Odd leftovers are
/// dropped, so the result may be one short of `width`.
fn center_text(text: &str, width: usize) -> String {
    let text = display_text(text, width);
    let spacer = " ".repeat((width - text.len()) / 2);
    format!("{spacer}{text}{spacer}")
}

/// Check a two byte acknowledgement
pub fn validate_ack(response: &[u8]) -> Result<()> {
    if response.len() != ACK_LEN {
        return Err(ProtocolError::ResponseLength {
            expected: ACK_LEN,
            actual: response.len(),
        });
    }

    check_header(response[0])
}

/// Check the leading byte of any response
pub fn check_header(byte: u8) -> Result<()> {
    if byte != HEADER {
        return Err(ProtocolError::BadHeader {
            expected: HEADER,
            actual: byte,
        });
    }
    Ok(())
}

/// Raw two-axis heading sensor sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorReading {
    pub x: i32,
    pub y: i32,
}

impl SensorReading {
    /// Heading in degrees, in (-180, 180]
    pub fn heading_degrees(&self) -> f64 {
        (self.y as f64).atan2(self.x as f64).to_degrees()
    }
}

/// Parse the bytes following the header of a sensor response. The payload
/// must end with the terminator.
pub fn parse_sensor_payload(payload: &[u8]) -> Result<SensorReading> {
    let body = match payload.split_last() {
        Some((&TERMINATOR, body)) => body,
        _ => return Err(ProtocolError::MissingTerminator(payload.len())),
    };

    let text = std::str::from_utf8(body).map_err(|_| ProtocolError::malformed(body))?;
    let (x, y) = text.split_once(',').ok_or_else(|| ProtocolError::malformed(body))?;

    let x = x.trim().parse().map_err(|_| ProtocolError::malformed(body))?;
    let y = y.trim().parse().map_err(|_| ProtocolError::malformed(body))?;

    Ok(SensorReading { x, y })
}
