//! The live-sync loop: follows new chain heads (by subscription when
//! available, by polling otherwise) and feeds each newly observed leaf
//! through [`process_new_leaf_event`].

use std::sync::Arc;
use std::time::Duration;

use accumulator_blockstore::BlockStoreClient;
use accumulator_chain::ChainAdapter;
use accumulator_mmr::Mmr;
use accumulator_storage::{highest_contiguous_leaf_index_with_data, StorageAdapter};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::leaf_commit::{catch_up_mmr_and_commit, walk_back_and_fill_db, LeafSubscriber};
use crate::pipeline_state::PipelineState;

pub const SUBSCRIPTION_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Runs live sync until `state.is_running()` goes false. Chooses a
/// `newHeads` subscription over polling when a websocket endpoint is
/// configured and answers the probe within [`SUBSCRIPTION_PROBE_TIMEOUT`].
/// `mmr` is locked only for the duration of each head's mutation — a reader
/// (e.g. the public `Dataset`) can observe it between heads.
pub async fn start_live_sync(
    chain: &ChainAdapter,
    blockstore: Arc<BlockStoreClient>,
    storage: &dyn StorageAdapter,
    mmr: &AsyncMutex<Mmr>,
    state: &mut PipelineState,
    leaf_subscribers: &[Box<dyn LeafSubscriber>],
    poll_interval: Duration,
) -> Result<(), SyncError> {
    if chain.probe_subscription_support(SUBSCRIPTION_PROBE_TIMEOUT).await {
        info!("newHeads subscription available, following chain head by push");
        run_subscription_loop(chain, blockstore, storage, mmr, state, leaf_subscribers).await
    } else {
        info!(?poll_interval, "no newHeads subscription, polling for new state");
        run_polling_loop(chain, blockstore, storage, mmr, state, leaf_subscribers, poll_interval).await
    }
}

async fn run_subscription_loop(
    chain: &ChainAdapter,
    blockstore: Arc<BlockStoreClient>,
    storage: &dyn StorageAdapter,
    mmr: &AsyncMutex<Mmr>,
    state: &mut PipelineState,
    leaf_subscribers: &[Box<dyn LeafSubscriber>],
) -> Result<(), SyncError> {
    let mut subscription = match chain.subscribe_new_heads().await {
        Ok(subscription) => subscription,
        Err(err) => {
            warn!(%err, "subscription setup failed after a successful probe, falling back to polling");
            return run_polling_loop(
                chain,
                blockstore,
                storage,
                mmr,
                state,
                leaf_subscribers,
                DEFAULT_POLL_INTERVAL,
            )
            .await;
        }
    };

    while state.is_running() {
        match subscription.next_head().await {
            Ok(()) => {
                on_new_head(chain, &blockstore, storage, mmr, state, leaf_subscribers).await?;
            }
            Err(err) => {
                warn!(%err, "newHeads subscription errored, falling back to polling");
                let _ = subscription.close().await;
                return run_polling_loop(
                    chain,
                    blockstore,
                    storage,
                    mmr,
                    state,
                    leaf_subscribers,
                    DEFAULT_POLL_INTERVAL,
                )
                .await;
            }
        }
    }
    let _ = subscription.close().await;
    Ok(())
}

async fn run_polling_loop(
    chain: &ChainAdapter,
    blockstore: Arc<BlockStoreClient>,
    storage: &dyn StorageAdapter,
    mmr: &AsyncMutex<Mmr>,
    state: &mut PipelineState,
    leaf_subscribers: &[Box<dyn LeafSubscriber>],
    poll_interval: Duration,
) -> Result<(), SyncError> {
    let mut ticker = tokio::time::interval(poll_interval);
    while state.is_running() {
        ticker.tick().await;
        on_new_head(chain, &blockstore, storage, mmr, state, leaf_subscribers).await?;
    }
    Ok(())
}

/// The shared per-head action: read the current chain state, and if it
/// reports a later block than we last processed, fetch and apply every
/// `LeafAppended` log in between.
async fn on_new_head(
    chain: &ChainAdapter,
    blockstore: &Arc<BlockStoreClient>,
    storage: &dyn StorageAdapter,
    mmr: &AsyncMutex<Mmr>,
    state: &mut PipelineState,
    leaf_subscribers: &[Box<dyn LeafSubscriber>],
) -> Result<(), SyncError> {
    let (chain_state, _peaks) = chain.get_state().await?;
    if chain_state.previous_append_block <= state.last_processed_block {
        return Ok(());
    }

    let from_block = state.last_processed_block + 1;
    let to_block = chain_state.previous_append_block;
    let events = chain.get_leaf_appended_logs(from_block, to_block).await?;

    let mut ordered = events;
    ordered.sort_by_key(|event| event.leaf_index);

    for event in ordered {
        process_new_leaf_event(chain, blockstore, storage, mmr, event, leaf_subscribers).await?;
    }

    state.last_processed_block = to_block;
    Ok(())
}

/// Applies one `LeafAppended` event to both the DB (filling any gap via
/// walk-back) and the in-memory MMR (catching up from DB when behind),
/// notifying leaf subscribers once the leaf is fully committed, and finally
/// comparing the local root against the chain's as a non-fatal sanity check.
pub async fn process_new_leaf_event(
    chain: &ChainAdapter,
    blockstore: &Arc<BlockStoreClient>,
    storage: &dyn StorageAdapter,
    mmr: &AsyncMutex<Mmr>,
    event: accumulator_chain::LeafAppendedEvent,
    leaf_subscribers: &[Box<dyn LeafSubscriber>],
) -> Result<(), SyncError> {
    let h_db = highest_contiguous_leaf_index_with_data(storage).await?;
    let event_index = i64::from(event.leaf_index);

    if event_index > h_db {
        if event_index > h_db + 1 {
            let (base_peaks, base_leaf_count) = {
                let guard = mmr.lock().await;
                (guard.peaks().to_vec(), guard.leaf_count())
            };
            walk_back_and_fill_db(chain, storage, &event, &base_peaks, base_leaf_count).await?;
        } else {
            crate::leaf_commit::write_single_event_record(storage, mmr, &event).await?;
        }
    }

    let h_mmr = {
        let guard = mmr.lock().await;
        if guard.leaf_count() == 0 {
            -1
        } else {
            (guard.leaf_count() - 1) as i64
        }
    };

    if event_index <= h_mmr {
        debug!(leaf_index = event.leaf_index, "leaf already committed to MMR, skipping");
        return Ok(());
    }

    let from = (h_mmr + 1) as u64;
    catch_up_mmr_and_commit(storage, blockstore, mmr, from, &event).await?;

    let new_data_hex = hex::encode(&event.new_data);
    for subscriber in leaf_subscribers {
        subscriber.on_leaf(event.leaf_index.into(), &new_data_hex);
    }

    let (chain_state, _) = chain.get_state().await?;
    let (local_leaf_count, local_root) = {
        let guard = mmr.lock().await;
        (guard.leaf_count(), guard.root())
    };
    if local_leaf_count == chain_state.leaf_count {
        match chain.get_root_cid().await {
            Ok(chain_root) if chain_root != local_root => {
                warn!(local = %local_root, chain = %chain_root, "post-commit root mismatch against chain");
            }
            Ok(_) => {}
            Err(err) => warn!(%err, "post-commit root_cid() call failed, skipping sanity check"),
        }
    }

    Ok(())
}
