/*!
Test doubles for the serial link.
*/

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shared::Frame;

use crate::link::{LinkError, LinkSettings, Port, PortOpener};

#[derive(Default)]
struct PortState {
    written: Vec<Vec<u8>>,
    replies: VecDeque<Vec<u8>>,
    default_reply: Option<Vec<u8>>,
    rx: VecDeque<u8>,
    fail_next_write: bool,
}

/// In-memory port. Each write is answered with the next scripted reply, or
/// the default reply when the script is empty.
#[derive(Clone, Default)]
pub struct ScriptedPort {
    state: Arc<Mutex<PortState>>,
}

impl ScriptedPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// A port that acknowledges every write with `\n\x01`
    pub fn acking() -> Self {
        let port = Self::new();
        port.state.lock().unwrap().default_reply = Some(b"\n\x01".to_vec());
        port
    }

    /// Queue the reply to the next unanswered write
    pub fn reply(&self, bytes: Vec<u8>) {
        self.state.lock().unwrap().replies.push_back(bytes);
    }

    /// Bytes already waiting to be read, as if left over from earlier traffic
    pub fn inject_stale(&self, bytes: &[u8]) {
        self.state.lock().unwrap().rx.extend(bytes);
    }

    pub fn fail_next_write(&self) {
        self.state.lock().unwrap().fail_next_write = true;
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().written.clone()
    }

    /// Everything written so far, decoded
    pub fn frames(&self) -> Vec<Frame> {
        self.written()
            .iter()
            .map(|bytes| Frame::from_bytes(bytes).unwrap())
            .collect()
    }
}

impl Port for ScriptedPort {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();

        if state.fail_next_write {
            state.fail_next_write = false;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "cable pulled"));
        }

        state.written.push(data.to_vec());
        let reply = state.replies.pop_front().or_else(|| state.default_reply.clone());
        if let Some(reply) = reply {
            state.rx.extend(reply);
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();

        if state.rx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }

        let count = buf.len().min(state.rx.len());
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().rx.clear();
        Ok(())
    }
}

/// Fails a fixed number of times before handing out the scripted port
pub struct FlakyOpener {
    port: ScriptedPort,
    failures: u64,
    attempts: Arc<AtomicU64>,
}

impl FlakyOpener {
    pub fn new(port: ScriptedPort, failures: u64) -> Self {
        Self {
            port,
            failures,
            attempts: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn attempts(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.attempts)
    }
}

impl PortOpener for FlakyOpener {
    fn open(&mut self, settings: &LinkSettings) -> Result<Box<dyn Port>, LinkError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if attempt <= self.failures {
            return Err(LinkError::Open {
                port: settings.port.clone(),
                reason: "device not present".to_string(),
            });
        }

        Ok(Box::new(self.port.clone()))
    }
}
