//! Plain, serializable configuration for every tunable the spec names a
//! default for. Loading from a file or environment is out of scope; these
//! structs and their `Default` impls are the contract a thin CLI/service
//! layer would populate.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Where committed leaf records and the trail log live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageBackend {
    InMemory,
    JsonFile { path: String },
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::InMemory
    }
}

/// On-chain endpoint configuration, mirroring [`accumulator_chain::ChainConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    pub rpc_url: Url,
    pub ws_url: Option<Url>,
    pub contract_address: String,
    #[serde(with = "duration_millis")]
    pub min_call_delay: Duration,
    pub retry_cap: u32,
}

/// Content-addressed client configuration, mirroring
/// [`accumulator_blockstore::BlockStoreConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockStoreSettings {
    pub gateway_url: Url,
    pub write_endpoint: Option<Url>,
    pub remote_pin_endpoint: Option<Url>,
    pub enable_put: bool,
    pub enable_pin: bool,
    pub enable_provide: bool,
    #[serde(with = "duration_millis")]
    pub pin_min_delay: Duration,
    pub circuit_breaker_threshold: u32,
}

/// Top-level configuration for one [`crate::AccumulatorClient`] instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub storage: StorageBackend,
    pub chain: ChainSettings,
    pub blockstore: Option<BlockStoreSettings>,
    pub backward_sweep_range_size: u64,
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
}

impl ClientConfig {
    #[must_use]
    pub fn new(rpc_url: Url, contract_address: String) -> Self {
        Self {
            storage: StorageBackend::InMemory,
            chain: ChainSettings {
                rpc_url,
                ws_url: None,
                contract_address,
                min_call_delay: accumulator_chain::transport::DEFAULT_MIN_DELAY,
                retry_cap: accumulator_chain::transport::DEFAULT_RETRY_CAP,
            },
            blockstore: None,
            backward_sweep_range_size: accumulator_sync::DEFAULT_RANGE_SIZE,
            poll_interval: accumulator_sync::DEFAULT_POLL_INTERVAL,
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
