//! A content-addressed block client over an HTTP gateway, with a
//! remote-pin side channel guarded by its own rate limiter and circuit
//! breaker.

pub mod circuit_breaker;
pub mod error;
pub mod rate_limit;

pub use circuit_breaker::CircuitBreaker;
pub use error::BlockStoreError;
pub use rate_limit::RateLimiter;

use std::time::Duration;

use accumulator_codec::{verify_cid_checked, Cid};
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_PIN_MIN_DELAY: Duration = Duration::from_millis(200);

/// Capability flags and endpoints for one block client instance.
/// `pin` is only ever effectively enabled when `put` is; `provide` only
/// when `pin` is — enforced in [`BlockStoreClient::new`], not left to the
/// caller to get right.
#[derive(Debug, Clone)]
pub struct BlockStoreConfig {
    pub gateway_url: Url,
    pub write_endpoint: Option<Url>,
    pub remote_pin_endpoint: Option<Url>,
    pub enable_put: bool,
    pub enable_pin: bool,
    pub enable_provide: bool,
    pub pin_min_delay: Duration,
    pub circuit_breaker_threshold: u32,
}

impl BlockStoreConfig {
    #[must_use]
    pub fn new(gateway_url: Url) -> Self {
        Self {
            gateway_url,
            write_endpoint: None,
            remote_pin_endpoint: None,
            enable_put: false,
            enable_pin: false,
            enable_provide: false,
            pin_min_delay: DEFAULT_PIN_MIN_DELAY,
            circuit_breaker_threshold: circuit_breaker::DEFAULT_THRESHOLD,
        }
    }
}

pub struct BlockStoreClient {
    http: Client,
    config: BlockStoreConfig,
    put_enabled: bool,
    pin_enabled: bool,
    provide_enabled: bool,
    pin_limiter: RateLimiter,
    pin_breaker: CircuitBreaker,
}

impl BlockStoreClient {
    #[must_use]
    pub fn new(config: BlockStoreConfig) -> Self {
        let put_enabled = config.enable_put && config.write_endpoint.is_some();
        let pin_enabled = config.enable_pin && put_enabled && config.remote_pin_endpoint.is_some();
        let provide_enabled = config.enable_provide && pin_enabled;

        let pin_limiter = RateLimiter::new(config.pin_min_delay);
        let pin_breaker = CircuitBreaker::new(config.circuit_breaker_threshold);

        Self {
            http: Client::new(),
            config,
            put_enabled,
            pin_enabled,
            provide_enabled,
            pin_limiter,
            pin_breaker,
        }
    }

    #[must_use]
    pub fn put_enabled(&self) -> bool {
        self.put_enabled
    }

    #[must_use]
    pub fn pin_enabled(&self) -> bool {
        self.pin_enabled
    }

    #[must_use]
    pub fn provide_enabled(&self) -> bool {
        self.provide_enabled
    }

    /// Fetches a block and verifies its bytes rehash to `cid`.
    pub async fn get(&self, cid: &Cid) -> Result<Vec<u8>, BlockStoreError> {
        let url = self
            .config
            .gateway_url
            .join(&format!("ipfs/{cid}"))
            .map_err(|err| BlockStoreError::Transport(err.to_string()))?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| BlockStoreError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            return Err(BlockStoreError::NotFound(cid.to_string()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| BlockStoreError::Transport(err.to_string()))?
            .to_vec();

        verify_cid_checked(&bytes, cid).map_err(|_| BlockStoreError::CidMismatch)?;
        Ok(bytes)
    }

    /// Verifies `bytes` against `cid` client-side, then PUTs the block. A
    /// server-reported CID mismatch is only logged, never failed — the
    /// client's own verification already ran before sending. On success,
    /// triggers the remote-pin side channel if enabled.
    pub async fn put(&self, cid: &Cid, bytes: &[u8]) -> Result<(), BlockStoreError> {
        verify_cid_checked(bytes, cid).map_err(|_| BlockStoreError::CidMismatch)?;

        if !self.put_enabled {
            return Err(BlockStoreError::Config("put is disabled".to_owned()));
        }
        let endpoint = self
            .config
            .write_endpoint
            .as_ref()
            .expect("put_enabled implies write_endpoint is set");

        let response = self
            .http
            .post(endpoint.clone())
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|err| BlockStoreError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            return Err(BlockStoreError::Transport(format!(
                "put returned HTTP {}",
                response.status()
            )));
        }

        if let Ok(server_cid) = response.text().await {
            if !server_cid.trim().is_empty() && server_cid.trim() != cid.to_string() {
                warn!(expected = %cid, got = %server_cid.trim(), "gateway echoed a different CID on put");
            }
        }

        if self.pin_enabled {
            self.remote_pin(cid).await;
        }

        Ok(())
    }

    /// Fire-and-forget `provide`: all errors are swallowed, and calling
    /// this when `provide` is disabled is a silent no-op.
    pub async fn provide(&self, cid: &Cid) {
        if !self.provide_enabled {
            return;
        }
        let url = match self.config.gateway_url.join(&format!("api/v0/provide?arg={cid}")) {
            Ok(url) => url,
            Err(err) => {
                debug!(%err, "failed to build provide URL, skipping");
                return;
            }
        };
        if let Err(err) = self.http.post(url).send().await {
            debug!(%err, %cid, "provide call failed, ignoring");
        }
    }

    async fn remote_pin(&self, cid: &Cid) {
        if self.pin_breaker.is_open() {
            return;
        }
        let endpoint = self
            .config
            .remote_pin_endpoint
            .clone()
            .expect("pin_enabled implies remote_pin_endpoint is set");

        self.pin_limiter.acquire().await;

        let result = self
            .http
            .post(endpoint)
            .json(&json!({ "cid": cid.to_string() }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                self.pin_breaker.record_success();
            }
            Ok(response) => {
                let tripped = self.pin_breaker.record_failure();
                warn!(%cid, status = %response.status(), tripped, "remote pin request failed");
            }
            Err(err) => {
                let tripped = self.pin_breaker.record_failure();
                warn!(%cid, %err, tripped, "remote pin request errored");
            }
        }
    }
}
