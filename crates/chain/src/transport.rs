//! A FIFO, rate-limited, retrying JSON-RPC transport. Every chain call goes
//! through here: a single `tokio::sync::Mutex` both serializes callers in
//! arrival order and is the natural place to enforce the minimum
//! inter-call delay, since the lock itself is held across the wait.

use std::time::{Duration, Instant};

use alloy::rpc::client::{ClientBuilder, ReqwestClient};
use rand::Rng;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tracing::warn;
use url::Url;

use crate::error::ChainError;

pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(200);
pub const DEFAULT_RETRY_CAP: u32 = 5;
const BACKOFF_FACTOR: u64 = 2;
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Throttled JSON-RPC transport over a single HTTP endpoint.
pub struct ThrottledTransport {
    client: ReqwestClient,
    last_call: Mutex<Instant>,
    min_delay: Duration,
    retry_cap: u32,
}

impl ThrottledTransport {
    pub fn new(rpc_url: Url) -> Result<Self, ChainError> {
        Self::with_limits(rpc_url, DEFAULT_MIN_DELAY, DEFAULT_RETRY_CAP)
    }

    pub fn with_limits(rpc_url: Url, min_delay: Duration, retry_cap: u32) -> Result<Self, ChainError> {
        let client = ClientBuilder::default().http(rpc_url);
        Ok(Self {
            client,
            last_call: Mutex::new(Instant::now() - min_delay),
            min_delay,
            retry_cap,
        })
    }

    /// Issues one JSON-RPC call, retrying on transport failure with
    /// full-jitter exponential backoff (factor 2) up to `retry_cap`
    /// attempts. Callers are serialized FIFO by the lock acquisition order.
    pub async fn call<P, R>(&self, method: &'static str, params: P) -> Result<R, ChainError>
    where
        P: Serialize + Clone + Send + Sync,
        R: DeserializeOwned + Send,
    {
        let mut attempt = 0_u32;
        loop {
            self.wait_for_slot().await;

            match self.client.request::<P, R>(method, params.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.retry_cap {
                        return Err(ChainError::Transport(format!(
                            "{method} failed after {attempt} retries: {err}"
                        )));
                    }
                    let delay = full_jitter_backoff(self.min_delay, attempt);
                    warn!(method, attempt, delay_ms = delay.as_millis() as u64, %err, "chain RPC call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn wait_for_slot(&self) {
        let mut last = self.last_call.lock().await;
        let elapsed = last.elapsed();
        if elapsed < self.min_delay {
            tokio::time::sleep(self.min_delay - elapsed).await;
        }
        *last = Instant::now();
    }
}

fn full_jitter_backoff(base: Duration, attempt: u32) -> Duration {
    let scaled = base
        .as_millis()
        .saturating_mul(u128::from(BACKOFF_FACTOR.saturating_pow(attempt)));
    let capped = scaled.min(MAX_BACKOFF.as_millis());
    let jittered = rand::thread_rng().gen_range(0..=capped.max(1));
    Duration::from_millis(jittered as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_bounded_by_max_and_factor() {
        for attempt in 0..6 {
            let delay = full_jitter_backoff(DEFAULT_MIN_DELAY, attempt);
            assert!(delay <= MAX_BACKOFF);
        }
    }
}
