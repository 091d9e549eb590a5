/*!
Command protocol client for the mount controller.

Name, status and tracking commands report a [`CommandOutcome`]: a missing or
garbled acknowledgement is logged and otherwise ignored, and a broken link
only means the next command reconnects. The heading sensor query is the one
exchange whose failure is returned to the caller.
*/

use thiserror::Error;
use tracing::{debug, warn};

use shared::frame::{check_header, parse_sensor_payload, validate_ack};
use shared::protocol::{ACK_LEN, SENSOR_RESPONSE_MAX, TERMINATOR};
use shared::{geometry, Command, ProtocolError, SensorReading, Tracking};

use crate::link::{FramedLink, LinkError};

/// Errors returned by the heading sensor query
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Link error: {0}")]
    Transport(#[from] LinkError),

    #[error("Sensor protocol error: {0}")]
    SensorProtocol(#[from] ProtocolError),
}

/// Result of a fire-and-acknowledge command
#[derive(Debug)]
pub enum CommandOutcome {
    Acknowledged,
    /// The device answered badly or not at all
    Unacknowledged(ProtocolError),
    /// The link dropped; it will be reopened on next use
    Disconnected(LinkError),
}

impl CommandOutcome {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Self::Acknowledged)
    }
}

/// Source of the current compass heading
pub trait HeadingSensor {
    /// Heading in degrees
    fn current_heading(&mut self) -> Result<f64, DeviceError>;
}

/// Two-axis servo mount
pub trait Actuator {
    /// Drive both servos to (azimuth, elevation), in servo-frame degrees
    fn set_position(&mut self, azimuth: f64, elevation: f64) -> CommandOutcome;

    /// Release the servos
    fn disable(&mut self) -> CommandOutcome;
}

/// The mount's two-line text display
pub trait StatusDisplay {
    fn show_name(&mut self, name: &str) -> CommandOutcome;

    fn show_status(&mut self, text: &str) -> CommandOutcome;
}

/// Protocol client. Exclusive owner of the link; one exchange at a time.
pub struct DeviceClient {
    link: FramedLink,
}

impl DeviceClient {
    pub fn new(link: FramedLink) -> Self {
        Self { link }
    }

    pub fn link(&self) -> &FramedLink {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut FramedLink {
        &mut self.link
    }

    pub fn set_name(&mut self, text: &str) -> CommandOutcome {
        self.execute(&Command::set_name(text))
    }

    pub fn set_status_text(&mut self, text: &str) -> CommandOutcome {
        self.execute(&Command::set_status_text(text))
    }

    pub fn set_tracking(&mut self, tracking: Tracking) -> CommandOutcome {
        self.execute(&Command::set_tracking(tracking))
    }

    /// Send every frame of `command`, reading the acknowledgement right
    /// after each write. A bad acknowledgement does not hold back the
    /// remaining frames; the first one is reported. A dropped link stops
    /// the command.
    pub fn execute(&mut self, command: &Command) -> CommandOutcome {
        let frames = match command.frames() {
            Ok(frames) => frames,
            Err(e) => {
                warn!("Refusing to send {:?}: {}", command, e);
                return CommandOutcome::Unacknowledged(e);
            }
        };

        let mut outcome = CommandOutcome::Acknowledged;

        for frame in frames {
            if let Err(e) = self.link.send(&frame.to_bytes()) {
                return CommandOutcome::Disconnected(e);
            }

            let response = match self.link.recv(ACK_LEN) {
                Ok(response) => response,
                Err(e) => return CommandOutcome::Disconnected(e),
            };

            if let Err(e) = validate_ack(&response) {
                if e.is_missing_response() {
                    warn!("No response from mount controller to {:?}", frame.code);
                } else {
                    warn!("Bad acknowledgement for {:?}: {}", frame.code, e);
                }
                if outcome.is_acknowledged() {
                    outcome = CommandOutcome::Unacknowledged(e);
                }
            }
        }

        outcome
    }

    /// Read the raw magnetometer axes.
    ///
    /// Clears stale input, sends the query, expects the header byte, then
    /// collects single bytes until the terminator or the byte budget runs out.
    pub fn query_heading_sensor(&mut self) -> Result<SensorReading, DeviceError> {
        self.link.reset_input_buffer()?;

        let frames = Command::QueryHeadingSensor.frames()?;
        for frame in &frames {
            self.link.send(&frame.to_bytes())?;
        }

        let header = self.link.recv(1)?;
        match header.first() {
            Some(&byte) => check_header(byte)?,
            None => {
                return Err(ProtocolError::ResponseLength { expected: 1, actual: 0 }.into());
            }
        }

        let budget = SENSOR_RESPONSE_MAX - 1;
        let mut payload = Vec::with_capacity(budget);

        while payload.len() < budget {
            let byte = self.link.recv(1)?;
            let Some(&byte) = byte.first() else {
                return Err(ProtocolError::ResponseLength {
                    expected: payload.len() + 2,
                    actual: payload.len() + 1,
                }
                .into());
            };

            payload.push(byte);
            if byte == TERMINATOR {
                break;
            }
        }

        let reading = parse_sensor_payload(&payload)?;
        debug!("Magnetometer reading: x={} y={}", reading.x, reading.y);
        Ok(reading)
    }
}

impl HeadingSensor for DeviceClient {
    fn current_heading(&mut self) -> Result<f64, DeviceError> {
        Ok(self.query_heading_sensor()?.heading_degrees())
    }
}

impl Actuator for DeviceClient {
    fn set_position(&mut self, azimuth: f64, elevation: f64) -> CommandOutcome {
        self.set_tracking(Tracking::Enabled {
            azimuth_pulse: geometry::pulse_width(azimuth),
            elevation_pulse: geometry::pulse_width(elevation),
        })
    }

    fn disable(&mut self) -> CommandOutcome {
        self.set_tracking(Tracking::Disabled)
    }
}

impl StatusDisplay for DeviceClient {
    fn show_name(&mut self, name: &str) -> CommandOutcome {
        self.set_name(name)
    }

    fn show_status(&mut self, text: &str) -> CommandOutcome {
        self.set_status_text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{ConnectionState, LinkSettings};
    use crate::shutdown::ShutdownSignal;
    use crate::testing::{FlakyOpener, ScriptedPort};
    use shared::CommandCode;
    use std::time::Duration;

    fn client(port: &ScriptedPort) -> DeviceClient {
        let settings = LinkSettings {
            reconnect_interval: Duration::from_millis(5),
            settle_time: Duration::from_millis(1),
            read_timeout: Duration::from_millis(50),
            ..LinkSettings::new("/dev/ttyACM0")
        };
        let link = FramedLink::new(Box::new(FlakyOpener::new(port.clone(), 0)), settings, ShutdownSignal::new());
        DeviceClient::new(link)
    }

    #[test]
    fn test_set_name_sends_padded_frame() {
        let port = ScriptedPort::acking();
        let mut device = client(&port);

        assert!(device.set_name("OSCAR 7").is_acknowledged());

        let frames = port.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].code, CommandCode::SetName);
        assert_eq!(frames[0].payload, b"       OSCAR 7       ".to_vec());
    }

    #[test]
    fn test_tracking_acks_each_frame() {
        let port = ScriptedPort::acking();
        let mut device = client(&port);

        assert!(device.set_position(90.0, 180.0).is_acknowledged());
        assert_eq!(port.written(), vec![b"\n2a1472\0".to_vec(), b"\n2e2400\0".to_vec()]);

        assert!(device.disable().is_acknowledged());
        assert_eq!(port.written().last().unwrap(), &b"\n20\0".to_vec());
    }

    #[test]
    fn test_bad_ack_is_a_warning() {
        let port = ScriptedPort::new();
        port.reply(b"xx".to_vec());
        let mut device = client(&port);

        let outcome = device.set_status_text("In 0:01:00");
        assert!(matches!(outcome, CommandOutcome::Unacknowledged(ProtocolError::BadHeader { .. })));

        // Silence is also only a warning
        let outcome = device.set_status_text("In 0:00:59");
        assert!(matches!(
            outcome,
            CommandOutcome::Unacknowledged(ProtocolError::ResponseLength { expected: 2, actual: 0 })
        ));
        assert_eq!(device.link().state(), ConnectionState::Open);
    }

    #[test]
    fn test_tracking_sends_elevation_after_bad_azimuth_ack() {
        let port = ScriptedPort::new();
        port.reply(b"xx".to_vec());
        port.reply(b"\n\x01".to_vec());
        let mut device = client(&port);

        let outcome = device.set_position(90.0, 90.0);
        assert!(matches!(
            outcome,
            CommandOutcome::Unacknowledged(ProtocolError::BadHeader { actual: b'x', .. })
        ));

        let written = port.written();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0], b"\n2a1472\0".to_vec());
        assert_eq!(written[1], b"\n2e1472\0".to_vec());
    }

    #[test]
    fn test_tracking_reports_missing_azimuth_ack() {
        let port = ScriptedPort::new();
        port.reply(Vec::new());
        port.reply(b"\n\x01".to_vec());
        let mut device = client(&port);

        let outcome = device.set_position(10.0, 50.0);
        assert!(matches!(outcome, CommandOutcome::Unacknowledged(ref e) if e.is_missing_response()));
        assert_eq!(port.written().len(), 2);
    }

    #[test]
    fn test_disconnect_is_reported_not_raised() {
        let port = ScriptedPort::acking();
        let mut device = client(&port);
        assert!(device.set_name("AO-91").is_acknowledged());

        port.fail_next_write();
        assert!(matches!(device.set_name("AO-91"), CommandOutcome::Disconnected(_)));
        assert_eq!(device.link().state(), ConnectionState::Closed);

        assert!(device.set_name("AO-91").is_acknowledged());
    }

    #[test]
    fn test_query_heading_sensor() {
        let port = ScriptedPort::new();
        port.inject_stale(b"\n\x01");
        port.reply(b"\n12,-34\0".to_vec());
        let mut device = client(&port);

        let reading = device.query_heading_sensor().unwrap();
        assert_eq!(reading, SensorReading { x: 12, y: -34 });
        assert_eq!(port.written(), vec![b"\n3\0".to_vec()]);
    }

    #[test]
    fn test_query_rejects_bad_header() {
        let port = ScriptedPort::new();
        port.reply(b"?12,-34\0".to_vec());
        let mut device = client(&port);

        assert!(matches!(
            device.query_heading_sensor(),
            Err(DeviceError::SensorProtocol(ProtocolError::BadHeader { actual: b'?', .. }))
        ));
    }

    #[test]
    fn test_query_rejects_missing_comma() {
        let port = ScriptedPort::new();
        port.reply(b"\n1234\0".to_vec());
        let mut device = client(&port);

        assert!(matches!(
            device.query_heading_sensor(),
            Err(DeviceError::SensorProtocol(ProtocolError::MalformedSensorPayload(_)))
        ));
    }

    #[test]
    fn test_query_rejects_truncated_payload() {
        let port = ScriptedPort::new();
        port.reply(b"\n12,".to_vec());
        let mut device = client(&port);

        assert!(matches!(
            device.query_heading_sensor(),
            Err(DeviceError::SensorProtocol(ProtocolError::ResponseLength { .. }))
        ));
    }

    #[test]
    fn test_query_enforces_byte_budget() {
        let port = ScriptedPort::new();
        port.reply(b"\n1234567,12345678\0".to_vec());
        let mut device = client(&port);

        assert!(matches!(
            device.query_heading_sensor(),
            Err(DeviceError::SensorProtocol(ProtocolError::MissingTerminator(14)))
        ));
    }

    #[test]
    fn test_current_heading_uses_atan2() {
        let port = ScriptedPort::new();
        port.reply(b"\n0,250\0".to_vec());
        let mut device = client(&port);

        let heading = device.current_heading().unwrap();
        assert!((heading - 90.0).abs() < 1e-9);
    }
}
