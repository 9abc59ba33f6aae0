use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

use crate::config::RateLimitConfig;

/// Sliding-window limiter shared by every worker in the pool.
///
/// A permit is taken before a send and stamped with its completion time when
/// dropped. A new permit is granted only while
/// `in_flight + completions_in_last_window < max`, so no window of length
/// `window` ever sees more than `max` completed sends.
#[derive(Debug)]
pub struct RateLimiter {
    max: u32,
    window: Duration,
    state: Mutex<WindowState>,
    released: Notify,
}

#[derive(Debug, Default)]
struct WindowState {
    in_flight: u32,
    completions: VecDeque<Instant>,
}

impl WindowState {
    fn evict(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.completions.front() {
            if *oldest + window <= now {
                self.completions.pop_front();
            } else {
                break;
            }
        }
    }

    fn used(&self) -> u32 {
        self.in_flight + self.completions.len() as u32
    }
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Arc<Self> {
        Arc::new(Self {
            max: max.max(1),
            window,
            state: Mutex::new(WindowState::default()),
            released: Notify::new(),
        })
    }

    pub fn from_config(config: &RateLimitConfig) -> Arc<Self> {
        Self::new(config.max, config.duration)
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait until a send may start
    pub async fn acquire(self: &Arc<Self>) -> RateLimitPermit {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            let wait = match self.try_grant() {
                Ok(permit) => return permit,
                Err(wait) => wait,
            };

            trace!(?wait, "rate limit reached, waiting for window");
            match wait {
                Some(until_expiry) => {
                    tokio::select! {
                        _ = released => {}
                        _ = tokio::time::sleep(until_expiry) => {}
                    }
                }
                // everything is in flight; the next release tells us when to look again
                None => released.await,
            }
        }
    }

    /// Take a permit only if one is available right now
    pub fn try_acquire(self: &Arc<Self>) -> Option<RateLimitPermit> {
        self.try_grant().ok()
    }

    /// Permits that could be granted right now
    pub fn available(&self) -> u32 {
        let mut state = self.state.lock();
        state.evict(Instant::now(), self.window);
        self.max.saturating_sub(state.used())
    }

    /// Grant a permit, or report how long until the oldest completion leaves the window
    fn try_grant(self: &Arc<Self>) -> Result<RateLimitPermit, Option<Duration>> {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.evict(now, self.window);

        if state.used() < self.max {
            state.in_flight += 1;
            return Ok(RateLimitPermit {
                limiter: Arc::clone(self),
            });
        }

        Err(state
            .completions
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now)))
    }

    fn release(&self) {
        {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.completions.push_back(Instant::now());
        }
        self.released.notify_waiters();
    }
}

/// Right to perform one send; stamps the window when dropped
#[derive(Debug)]
pub struct RateLimitPermit {
    limiter: Arc<RateLimiter>,
}

impl Drop for RateLimitPermit {
    fn drop(&mut self) {
        self.limiter.release();
    }
}
