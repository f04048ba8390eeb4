use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// A FIFO minimum-inter-call-delay gate. `tokio::sync::Mutex` grants the
/// lock in acquisition order, which is what gives callers their FIFO
/// ordering; the wait for the minimum delay happens inside the held lock.
pub struct RateLimiter {
    last_call: Mutex<Instant>,
    min_delay: Duration,
}

impl RateLimiter {
    #[must_use]
    pub fn new(min_delay: Duration) -> Self {
        Self {
            last_call: Mutex::new(Instant::now() - min_delay),
            min_delay,
        }
    }

    pub async fn acquire(&self) {
        let mut last = self.last_call.lock().await;
        let elapsed = last.elapsed();
        if elapsed < self.min_delay {
            tokio::time::sleep(self.min_delay - elapsed).await;
        }
        *last = Instant::now();
    }
}
