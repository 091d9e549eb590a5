/*!
Capped exponential back-off for network fetches.
*/

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::shutdown::ShutdownSignal;

/// Starting interval and the ceiling past which a fetch is abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub cap: Duration,
}

impl RetryPolicy {
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Self { initial, cap }
    }
}

/// Progress of one retry sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    pub attempts: u32,
    pub interval: Duration,
}

impl RetryState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempts: 0,
            interval: policy.initial,
        }
    }
}

/// Run `op` until it succeeds. After each failure, sleep the current
/// interval and double it; once the doubled interval passes the cap, give up
/// and return `None`. Shutdown also returns `None`.
pub async fn retry_with_backoff<T, E, F, Fut>(
    what: &str,
    policy: RetryPolicy,
    shutdown: &ShutdownSignal,
    mut op: F,
) -> Option<T>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut state = RetryState::new(&policy);

    loop {
        state.attempts += 1;

        match op().await {
            Ok(value) => {
                if state.attempts > 1 {
                    info!("{} succeeded after {} attempts", what, state.attempts);
                }
                return Some(value);
            }
            Err(e) => {
                warn!("Error getting {} (attempt {}): {}", what, state.attempts, e);

                if shutdown.wait_async(state.interval).await {
                    return None;
                }

                state.interval = state.interval.saturating_mul(2);
                if state.interval > policy.cap {
                    warn!("Giving up on {} until the next refresh", what);
                    return None;
                }
            }
        }
    }
}
