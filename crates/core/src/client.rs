//! `open`/`start`/`shutdown` and the `sync.*` façade: wires the chain,
//! block-store, and storage adapters together, rebuilds the in-memory MMR
//! from whatever storage already holds, and drives the reconciliation
//! pipeline in the background.

use std::sync::Arc;
use std::time::Duration;

use accumulator_blockstore::{BlockStoreClient, BlockStoreConfig};
use accumulator_chain::{ChainAdapter, ChainConfig};
use accumulator_mmr::Mmr;
use accumulator_storage::{
    highest_contiguous_leaf_index_with_data, read_leaf_record, InMemoryStorage, JsonFileStorage, StorageAdapter,
};
use accumulator_sync::{
    republish_trail, start_live_sync, sync_backwards_from_latest, LeafSubscriber, PipelineState, RepublishReport,
    SyncHandle,
};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::config::{BlockStoreSettings, ClientConfig, StorageBackend};
use crate::dataset::{Dataset, FanOutSubscriber};

/// Rebuilds an in-memory [`Mmr`] by replaying every leaf record storage
/// already holds, in index order. Used at `open()` time and again after the
/// backward sweep deposits new records into an until-then-empty store.
async fn rebuild_mmr_from_storage(storage: &dyn StorageAdapter) -> eyre::Result<Mmr> {
    let highest = highest_contiguous_leaf_index_with_data(storage).await?;
    let mut mmr = Mmr::new();
    if highest < 0 {
        return Ok(mmr);
    }
    for index in 0..=(highest as u64) {
        let record = read_leaf_record(storage, index)
            .await?
            .ok_or_else(|| eyre::eyre!("leaf {index} unexpectedly missing during MMR rebuild"))?;
        mmr.append(index, record.new_data)?;
    }
    Ok(mmr)
}

fn build_blockstore(settings: Option<&BlockStoreSettings>) -> eyre::Result<BlockStoreClient> {
    match settings {
        Some(settings) => {
            let mut config = BlockStoreConfig::new(settings.gateway_url.clone());
            config.write_endpoint = settings.write_endpoint.clone();
            config.remote_pin_endpoint = settings.remote_pin_endpoint.clone();
            config.enable_put = settings.enable_put;
            config.enable_pin = settings.enable_pin;
            config.enable_provide = settings.enable_provide;
            config.pin_min_delay = settings.pin_min_delay;
            config.circuit_breaker_threshold = settings.circuit_breaker_threshold;
            Ok(BlockStoreClient::new(config))
        }
        None => {
            let gateway = url::Url::parse("http://127.0.0.1:8080/")?;
            Ok(BlockStoreClient::new(BlockStoreConfig::new(gateway)))
        }
    }
}

/// The wired-together client named by the public API: `open`, `start`,
/// `shutdown`, plus `.data()` and `.sync_handle()` façades.
pub struct AccumulatorClient {
    storage: Arc<dyn StorageAdapter>,
    chain: Arc<ChainAdapter>,
    blockstore: Arc<BlockStoreClient>,
    mmr: Arc<AsyncMutex<Mmr>>,
    fan_out: Arc<FanOutSubscriber>,
    backward_sweep_range_size: u64,
    poll_interval: Duration,
    pipeline_state: Option<PipelineState>,
    sync_handle: Option<SyncHandle>,
    live_sync_task: Option<JoinHandle<()>>,
}

impl AccumulatorClient {
    /// Opens storage and rebuilds the in-memory MMR from it. Does not talk
    /// to the chain yet — that begins with [`Self::start`].
    #[instrument(skip(config))]
    pub async fn open(config: ClientConfig) -> eyre::Result<Self> {
        let storage: Arc<dyn StorageAdapter> = match &config.storage {
            StorageBackend::InMemory => Arc::new(InMemoryStorage::new()),
            StorageBackend::JsonFile { path } => Arc::new(JsonFileStorage::new(path.clone())),
        };
        storage.open().await?;

        let chain_config = ChainConfig {
            rpc_url: config.chain.rpc_url.clone(),
            ws_url: config.chain.ws_url.clone(),
            contract_address: config.chain.contract_address.clone(),
            min_call_delay: config.chain.min_call_delay,
            retry_cap: config.chain.retry_cap,
            event_topic0_override: None,
            state_calldata_override: None,
            root_cid_calldata_override: None,
        };
        let chain = Arc::new(ChainAdapter::new(chain_config)?);
        let blockstore = Arc::new(build_blockstore(config.blockstore.as_ref())?);

        let mmr = rebuild_mmr_from_storage(storage.as_ref()).await?;
        info!(leaf_count = mmr.leaf_count(), "opened accumulator client");

        Ok(Self {
            storage,
            chain,
            blockstore,
            mmr: Arc::new(AsyncMutex::new(mmr)),
            fan_out: Arc::new(FanOutSubscriber::new()),
            backward_sweep_range_size: config.backward_sweep_range_size,
            poll_interval: config.poll_interval,
            pipeline_state: None,
            sync_handle: None,
            live_sync_task: None,
        })
    }

    /// The read-side façade (`data.*`).
    #[must_use]
    pub fn data(&self) -> Dataset {
        Dataset {
            storage: self.storage.clone(),
            mmr: self.mmr.clone(),
            fan_out: self.fan_out.clone(),
        }
    }

    /// A handle to stop the live-sync loop (`sync.stop_live_sync()`).
    /// Only meaningful after [`Self::start`] has been called.
    #[must_use]
    pub fn sync_handle(&self) -> Option<SyncHandle> {
        self.sync_handle.clone()
    }

    /// Runs the one-time backward historical sweep, then spawns live sync
    /// in the background. Idempotent only in the sense that calling it
    /// twice spawns a second live-sync task; callers should call it once.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> eyre::Result<()> {
        sync_backwards_from_latest(
            self.chain.as_ref(),
            self.blockstore.clone(),
            self.storage.as_ref(),
            self.backward_sweep_range_size,
        )
        .await?;

        {
            let mut mmr = self.mmr.lock().await;
            if mmr.leaf_count() == 0 {
                *mmr = rebuild_mmr_from_storage(self.storage.as_ref()).await?;
            }
        }

        let last_processed_block = {
            let mmr = self.mmr.lock().await;
            if mmr.leaf_count() == 0 {
                0
            } else {
                let (chain_state, _) = self.chain.get_state().await?;
                chain_state.previous_append_block
            }
        };
        let highest_committed = {
            let mmr = self.mmr.lock().await;
            if mmr.leaf_count() == 0 {
                -1
            } else {
                (mmr.leaf_count() - 1) as i64
            }
        };
        let mut pipeline_state = PipelineState::new(last_processed_block, highest_committed);
        let sync_handle = pipeline_state.handle();
        self.sync_handle = Some(sync_handle.clone());

        let chain = self.chain.clone();
        let blockstore = self.blockstore.clone();
        let storage = self.storage.clone();
        let mmr = self.mmr.clone();
        let fan_out = self.fan_out.clone();
        let poll_interval = self.poll_interval;

        let task = tokio::spawn(async move {
            let leaf_subscribers: Vec<Box<dyn LeafSubscriber>> = vec![Box::new(fan_out)];
            if let Err(err) = start_live_sync(
                chain.as_ref(),
                blockstore,
                storage.as_ref(),
                mmr.as_ref(),
                &mut pipeline_state,
                &leaf_subscribers,
                poll_interval,
            )
            .await
            {
                warn!(%err, "live sync loop exited with an error");
            }
        });
        self.live_sync_task = Some(task);

        Ok(())
    }

    /// Operator-initiated re-pin of the entire trail log.
    pub async fn republish(&self) -> eyre::Result<RepublishReport> {
        Ok(republish_trail(self.storage.as_ref(), &self.blockstore).await?)
    }

    /// Stops live sync (if running), waits for its task to exit, and closes
    /// storage.
    #[instrument(skip(self))]
    pub async fn shutdown(mut self) -> eyre::Result<()> {
        if let Some(handle) = self.sync_handle.take() {
            handle.stop_live_sync();
        }
        if let Some(task) = self.live_sync_task.take() {
            let _ = task.await;
        }
        self.storage.close().await?;
        Ok(())
    }
}
