/*!
Serial link to the mount controller.

[`FramedLink`] owns the port. It only moves bytes; it never looks at what
they mean. Any I/O error tears the connection down and is reported as
[`LinkError::Transport`]; the next operation reconnects lazily, retrying
forever at a fixed interval until the port opens or shutdown is requested.
*/

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, SerialPort};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::shutdown::ShutdownSignal;

/// Link failures
#[derive(Error, Debug)]
pub enum LinkError {
    /// The connection broke mid-exchange and has been closed
    #[error("Transport fault: {0}")]
    Transport(#[from] io::Error),

    /// The port could not be opened
    #[error("Unable to open {port}: {reason}")]
    Open { port: String, reason: String },

    /// Shutdown was requested while waiting for the device
    #[error("Cancelled by shutdown")]
    Cancelled,
}

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
}

/// Port parameters
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub reconnect_interval: Duration,
    pub settle_time: Duration,
}

impl LinkSettings {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: shared::protocol::BAUD_RATE,
            read_timeout: Duration::from_millis(shared::protocol::READ_TIMEOUT_MS),
            reconnect_interval: Duration::from_secs(5),
            settle_time: Duration::from_secs(2),
        }
    }
}

/// Byte-level access to an open port
pub trait Port: Send {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read whatever is available, blocking up to the port timeout.
    /// A timeout is reported as `ErrorKind::TimedOut`.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Bound how long the next `read` may block
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Drop any received bytes not yet read
    fn clear_input(&mut self) -> io::Result<()>;
}

/// Opens ports. Separate from [`Port`] so reconnects can be exercised in tests.
pub trait PortOpener: Send {
    fn open(&mut self, settings: &LinkSettings) -> Result<Box<dyn Port>, LinkError>;
}

/// Real serial ports via `serialport`
pub struct SerialOpener;

impl PortOpener for SerialOpener {
    fn open(&mut self, settings: &LinkSettings) -> Result<Box<dyn Port>, LinkError> {
        let mut port = serialport::new(&settings.port, settings.baud_rate)
            .timeout(settings.read_timeout)
            .open()
            .map_err(|e| LinkError::Open {
                port: settings.port.clone(),
                reason: e.to_string(),
            })?;

        // Keep DTR low so the controller is not held in reset
        if let Err(e) = port.write_data_terminal_ready(false) {
            debug!("Could not clear DTR on {}: {}", settings.port, e);
        }

        Ok(Box::new(SerialDevice { port }))
    }
}

struct SerialDevice {
    port: Box<dyn SerialPort>,
}

impl Port for SerialDevice {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::from)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// Owner of the physical connection
pub struct FramedLink {
    opener: Box<dyn PortOpener>,
    settings: LinkSettings,
    port: Option<Box<dyn Port>>,
    state: ConnectionState,
    shutdown: ShutdownSignal,
}

impl FramedLink {
    /// Create a closed link. Nothing is opened until [`connect`](Self::connect)
    /// or the first I/O call.
    pub fn new(opener: Box<dyn PortOpener>, settings: LinkSettings, shutdown: ShutdownSignal) -> Self {
        Self {
            opener,
            settings,
            port: None,
            state: ConnectionState::Closed,
            shutdown,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    /// Open the port, retrying at a fixed interval with no upper bound, then
    /// give the controller time to finish its post-connect reset. Only
    /// shutdown ends the retries early.
    pub fn connect(&mut self) -> Result<(), LinkError> {
        if self.port.is_some() {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        let mut attempts = 0u64;

        loop {
            attempts += 1;

            match self.opener.open(&self.settings) {
                Ok(port) => {
                    info!("🔌 Opened {} at {} baud (attempt {})", self.settings.port, self.settings.baud_rate, attempts);

                    if self.shutdown.wait(self.settings.settle_time) {
                        self.state = ConnectionState::Closed;
                        return Err(LinkError::Cancelled);
                    }

                    self.port = Some(port);
                    self.state = ConnectionState::Open;
                    return Ok(());
                }
                Err(e) => {
                    warn!("Unable to connect to mount controller, retrying in {:?}: {}", self.settings.reconnect_interval, e);

                    if self.shutdown.wait(self.settings.reconnect_interval) {
                        self.state = ConnectionState::Closed;
                        return Err(LinkError::Cancelled);
                    }
                }
            }
        }
    }

    /// Release the port
    pub fn close(&mut self) {
        if self.port.take().is_some() {
            info!("Closed {}", self.settings.port);
        }
        self.state = ConnectionState::Closed;
    }

    /// Write raw bytes
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        debug!("→ {}", hex::encode(bytes));
        self.with_port(|port| port.write_all(bytes))
    }

    /// Read up to `n` bytes, stopping early when the read timeout elapses.
    /// The timeout bounds the whole call, not each underlying read.
    /// A short (even empty) result is not an error.
    pub fn recv(&mut self, n: usize) -> Result<Vec<u8>, LinkError> {
        let timeout = self.settings.read_timeout;

        let received = self.with_port(|port| {
            let deadline = Instant::now() + timeout;
            let mut buf = vec![0u8; n];
            let mut filled = 0;

            while filled < n {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                port.set_timeout(remaining)?;

                match port.read(&mut buf[filled..]) {
                    Ok(0) => break,
                    Ok(count) => filled += count,
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(e),
                }
            }

            buf.truncate(filled);
            Ok(buf)
        })?;

        debug!("← {}", hex::encode(&received));
        Ok(received)
    }

    /// Discard unread input so stale bytes from an earlier failed exchange
    /// cannot be taken for the next response
    pub fn reset_input_buffer(&mut self) -> Result<(), LinkError> {
        self.with_port(|port| port.clear_input())
    }

    /// Run `op` against the open port, connecting first if needed. An I/O
    /// error closes the connection.
    fn with_port<T>(&mut self, op: impl FnOnce(&mut dyn Port) -> io::Result<T>) -> Result<T, LinkError> {
        self.connect()?;

        let Some(port) = self.port.as_mut() else {
            return Err(LinkError::Cancelled);
        };

        match op(port.as_mut()) {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("Mount controller disconnected: {}", e);
                self.close();
                Err(LinkError::Transport(e))
            }
        }
    }
}

impl Drop for FramedLink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FlakyOpener, ScriptedPort};
    use std::sync::atomic::Ordering;

    fn fast_settings() -> LinkSettings {
        LinkSettings {
            reconnect_interval: Duration::from_millis(20),
            settle_time: Duration::from_millis(1),
            read_timeout: Duration::from_millis(50),
            ..LinkSettings::new("/dev/null")
        }
    }

    #[test]
    fn test_connect_retries_until_open() {
        let port = ScriptedPort::new();
        let opener = FlakyOpener::new(port, 3);
        let attempts = opener.attempts();

        let mut link = FramedLink::new(Box::new(opener), fast_settings(), ShutdownSignal::new());
        assert_eq!(link.state(), ConnectionState::Closed);

        let start = Instant::now();
        link.connect().unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert!(start.elapsed() >= Duration::from_millis(60));
        assert_eq!(link.state(), ConnectionState::Open);
    }

    #[test]
    fn test_connect_is_cancelled_by_shutdown() {
        let opener = FlakyOpener::new(ScriptedPort::new(), u64::MAX);
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();

        let mut link = FramedLink::new(Box::new(opener), fast_settings(), shutdown);
        assert!(matches!(link.connect(), Err(LinkError::Cancelled)));
        assert_eq!(link.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_transport_fault_closes_then_reconnects() {
        let port = ScriptedPort::new();
        let opener = FlakyOpener::new(port.clone(), 0);
        let attempts = opener.attempts();

        let mut link = FramedLink::new(Box::new(opener), fast_settings(), ShutdownSignal::new());
        link.send(b"\n1\0").unwrap();
        assert_eq!(link.state(), ConnectionState::Open);

        port.fail_next_write();
        assert!(matches!(link.send(b"\n1\0"), Err(LinkError::Transport(_))));
        assert_eq!(link.state(), ConnectionState::Closed);

        link.send(b"\n1\0").unwrap();
        assert_eq!(link.state(), ConnectionState::Open);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_recv_returns_short_reads() {
        let port = ScriptedPort::new();
        port.reply(b"\n".to_vec());

        let mut link = FramedLink::new(Box::new(FlakyOpener::new(port, 0)), fast_settings(), ShutdownSignal::new());
        link.send(b"\n0\0").unwrap();

        assert_eq!(link.recv(2).unwrap(), b"\n".to_vec());
        assert!(link.recv(2).unwrap().is_empty());
        assert_eq!(link.state(), ConnectionState::Open);
    }

    #[test]
    fn test_reset_discards_stale_input() {
        let port = ScriptedPort::new();
        port.reply(b"\nX".to_vec());

        let mut link = FramedLink::new(Box::new(FlakyOpener::new(port, 0)), fast_settings(), ShutdownSignal::new());
        link.send(b"\n0\0").unwrap();
        link.reset_input_buffer().unwrap();

        assert!(link.recv(2).unwrap().is_empty());
    }

    /// Delivers one byte per `interval`, honouring the timeout it is given
    struct TricklePort {
        interval: Duration,
        timeout: Duration,
    }

    impl Port for TricklePort {
        fn write_all(&mut self, _data: &[u8]) -> io::Result<()> {
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.timeout < self.interval {
                std::thread::sleep(self.timeout);
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            }

            std::thread::sleep(self.interval);
            buf[0] = b'\n';
            Ok(1)
        }

        fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
            self.timeout = timeout;
            Ok(())
        }

        fn clear_input(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct TrickleOpener(Duration);

    impl PortOpener for TrickleOpener {
        fn open(&mut self, settings: &LinkSettings) -> Result<Box<dyn Port>, LinkError> {
            Ok(Box::new(TricklePort {
                interval: self.0,
                timeout: settings.read_timeout,
            }))
        }
    }

    #[test]
    fn test_recv_timeout_bounds_whole_call() {
        let opener = TrickleOpener(Duration::from_millis(45));
        let mut link = FramedLink::new(Box::new(opener), fast_settings(), ShutdownSignal::new());
        link.connect().unwrap();

        let start = Instant::now();
        let received = link.recv(2).unwrap();
        let elapsed = start.elapsed();

        assert_eq!(received, b"\n".to_vec());
        assert!(elapsed < Duration::from_millis(80), "recv took {elapsed:?}");
    }
}
