/*!
Cancellable waiting.

Every blocking pause in the station (reconnect back-off, device settle time,
loop pacing, catalog retries) goes through [`ShutdownSignal::wait`] so that a
Ctrl+C ends them promptly instead of after the full interval.
*/

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

/// Clonable shutdown flag. Nothing is ever sent on the channel; triggering
/// drops the only sender, which wakes every waiter at once.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: Arc<Mutex<Option<Sender<()>>>>,
    receiver: Receiver<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(0);
        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
            receiver,
        }
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        let mut sender = match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sender.take();
    }

    pub fn is_triggered(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep for `duration` unless shutdown is requested first.
    /// Returns `true` if the wait was cut short by shutdown.
    pub fn wait(&self, duration: Duration) -> bool {
        match self.receiver.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => true,
            Ok(()) => self.is_triggered(),
        }
    }

    /// Async counterpart of [`wait`](Self::wait), polling the flag in short slices
    pub async fn wait_async(&self, duration: Duration) -> bool {
        let slice = Duration::from_millis(100);
        let deadline = tokio::time::Instant::now() + duration;

        loop {
            if self.is_triggered() {
                return true;
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return false;
            }

            tokio::time::sleep(slice.min(deadline - now)).await;
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
