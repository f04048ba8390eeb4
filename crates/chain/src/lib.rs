//! The on-chain side of the archive: decoding the packed accumulator state
//! and `LeafAppended` events, issuing view calls, and fetching logs — all
//! through a single rate-limited, retrying JSON-RPC transport.

pub mod abi;
pub mod error;
pub mod transport;
pub mod ws;

pub use abi::{ChainState, LeafAppendedEvent};
pub use error::ChainError;
pub use transport::ThrottledTransport;
pub use ws::NewHeadsSubscription;

use std::time::Duration;

use accumulator_codec::Cid;
use alloy::primitives::keccak256;
use serde::Deserialize;
use serde_json::json;
use url::Url;

/// Configuration for one chain adapter instance. Calldata overrides exist
/// for contracts that front `getState`/`getRootCID` behind a dispatcher and
/// need a different selector or prefix than the plain signature hash.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub rpc_url: Url,
    pub ws_url: Option<Url>,
    pub contract_address: String,
    pub min_call_delay: Duration,
    pub retry_cap: u32,
    pub event_topic0_override: Option<[u8; 32]>,
    pub state_calldata_override: Option<Vec<u8>>,
    pub root_cid_calldata_override: Option<Vec<u8>>,
}

impl ChainConfig {
    #[must_use]
    pub fn new(rpc_url: Url, contract_address: String) -> Self {
        Self {
            rpc_url,
            ws_url: None,
            contract_address,
            min_call_delay: transport::DEFAULT_MIN_DELAY,
            retry_cap: transport::DEFAULT_RETRY_CAP,
            event_topic0_override: None,
            state_calldata_override: None,
            root_cid_calldata_override: None,
        }
    }
}

fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn leaf_appended_topic0() -> [u8; 32] {
    *keccak256(b"LeafAppended(uint32,uint32,bytes,bytes32[])")
}

fn hex_encode_calldata(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn decode_hex_response(raw: &str) -> Result<Vec<u8>, ChainError> {
    let trimmed = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(trimmed).map_err(|err| ChainError::Abi(format!("response is not valid hex: {err}")))
}

/// The chain adapter: view calls, log fetches, and the packed-state reader,
/// all serialized through one [`ThrottledTransport`].
pub struct ChainAdapter {
    transport: ThrottledTransport,
    config: ChainConfig,
}

impl ChainAdapter {
    pub fn new(config: ChainConfig) -> Result<Self, ChainError> {
        let transport =
            ThrottledTransport::with_limits(config.rpc_url.clone(), config.min_call_delay, config.retry_cap)?;
        Ok(Self { transport, config })
    }

    async fn eth_call(&self, calldata: Vec<u8>) -> Result<Vec<u8>, ChainError> {
        let params = json!([
            {
                "to": self.config.contract_address,
                "data": hex_encode_calldata(&calldata),
            },
            "latest",
        ]);
        let response: String = self.transport.call("eth_call", params).await?;
        decode_hex_response(&response)
    }

    /// Reads `getState() -> (uint256, bytes32[32])`: the packed state word
    /// and the raw peak digest array, wrapped into CIDs — only the first
    /// `peak_count` entries are meaningful, in MMR left-to-right order.
    pub async fn get_state(&self) -> Result<(ChainState, Vec<Cid>), ChainError> {
        let calldata = self
            .config
            .state_calldata_override
            .clone()
            .unwrap_or_else(|| selector("getState()").to_vec());
        let response = self.eth_call(calldata).await?;

        if response.len() < 32 + 32 * 32 {
            return Err(ChainError::Abi("getState response shorter than expected".to_owned()));
        }
        let mut word = [0_u8; 32];
        word.copy_from_slice(&response[0..32]);
        let state = abi::decode_state_word(&word)?;

        let mut digests = Vec::with_capacity(usize::from(state.peak_count));
        for i in 0..usize::from(state.peak_count) {
            let offset = 32 + 32 * i;
            let mut digest = [0_u8; 32];
            digest.copy_from_slice(&response[offset..offset + 32]);
            digests.push(abi::peak_digest_to_cid(digest));
        }

        Ok((state, digests))
    }

    /// Reads `getRootCID() -> bytes`, the CIDv1 binary form of the current
    /// root.
    pub async fn get_root_cid(&self) -> Result<Cid, ChainError> {
        let calldata = self
            .config
            .root_cid_calldata_override
            .clone()
            .unwrap_or_else(|| selector("getRootCID()").to_vec());
        let response = self.eth_call(calldata).await?;
        let cid_bytes = abi::decode_bare_bytes_response(&response)?;
        Ok(Cid::from_bytes(&cid_bytes)?)
    }

    /// Fetches `LeafAppended` logs over `[from_block, to_block]` inclusive.
    pub async fn get_leaf_appended_logs(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LeafAppendedEvent>, ChainError> {
        let topic0 = self.config.event_topic0_override.unwrap_or_else(leaf_appended_topic0);
        let params = json!([{
            "address": self.config.contract_address,
            "fromBlock": format!("0x{from_block:x}"),
            "toBlock": format!("0x{to_block:x}"),
            "topics": [hex_encode_calldata(&topic0)],
        }]);

        let raw_logs: Vec<RawLog> = self.transport.call("eth_getLogs", params).await?;
        let mut events = Vec::with_capacity(raw_logs.len());
        for log in raw_logs {
            let topic1 = log
                .topics
                .get(1)
                .ok_or_else(|| ChainError::Abi("LeafAppended log missing indexed leafIndex topic".to_owned()))?;
            let topic1_bytes = decode_hex_response(topic1)?;
            let mut topic1_word = [0_u8; 32];
            if topic1_bytes.len() != 32 {
                return Err(ChainError::Abi("leafIndex topic is not 32 bytes".to_owned()));
            }
            topic1_word.copy_from_slice(&topic1_bytes);
            let leaf_index = abi::decode_leaf_index_topic(&topic1_word);

            let data = decode_hex_response(&log.data)?;
            let block_number = u64::from_str_radix(
                log.block_number.strip_prefix("0x").unwrap_or(&log.block_number),
                16,
            )
            .map_err(|err| ChainError::Abi(format!("malformed blockNumber in log: {err}")))?;

            events.push(abi::decode_leaf_appended_data(leaf_index, &data, block_number)?);
        }
        Ok(events)
    }

    /// Probes whether the configured websocket endpoint supports
    /// `eth_subscribe("newHeads")` within a short timeout.
    pub async fn probe_subscription_support(&self, probe_timeout: Duration) -> bool {
        let Some(ws_url) = self.config.ws_url.clone() else {
            return false;
        };
        tokio::time::timeout(probe_timeout, ws::probe_new_heads(&ws_url))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }

    /// Opens a live `newHeads` subscription. Callers should only do this
    /// after [`Self::probe_subscription_support`] succeeds.
    pub async fn subscribe_new_heads(&self) -> Result<NewHeadsSubscription, ChainError> {
        let ws_url = self
            .config
            .ws_url
            .clone()
            .ok_or_else(|| ChainError::Config("no websocket endpoint configured".to_owned()))?;
        NewHeadsSubscription::connect(&ws_url).await
    }
}

#[derive(Debug, Deserialize)]
struct RawLog {
    topics: Vec<String>,
    data: String,
    #[serde(rename = "blockNumber")]
    block_number: String,
}
