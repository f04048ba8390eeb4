//! Per-event leaf commit: the DB-side gap walk-back and the MMR-side
//! catch-up/append, as described for `process_new_leaf_event`.

use std::sync::Arc;

use accumulator_blockstore::BlockStoreClient;
use accumulator_chain::{ChainAdapter, LeafAppendedEvent};
use accumulator_mmr::{peak_heights, Mmr};
use accumulator_storage::{
    append_trail_pair, highest_contiguous_leaf_index_with_data, read_leaf_record, write_leaf_record, LeafRecord,
    PeakWithHeight, StorageAdapter,
};
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::error::SyncError;

/// Invoked for each committed leaf: `(leaf_index, hex(new_data))`.
pub trait LeafSubscriber: Send + Sync {
    fn on_leaf(&self, index: u64, new_data_hex: &str);
}

/// Walks `previous_append_block` pointers backward from `event` until
/// reaching `h_db + 1`, fetching one log per intermediate leaf, then writes
/// DB records for all of them oldest-first (including `event` itself).
/// `base_peaks`/`base_leaf_count` must describe the MMR state immediately
/// before the oldest leaf being filled — in the normal live-sync flow this
/// is simply the current in-memory MMR's state, since the DB and MMR
/// cursors track the same event stream.
pub async fn walk_back_and_fill_db(
    chain: &ChainAdapter,
    storage: &dyn StorageAdapter,
    event: &LeafAppendedEvent,
    base_peaks: &[accumulator_codec::Cid],
    base_leaf_count: u64,
) -> Result<(), SyncError> {
    let h_db = highest_contiguous_leaf_index_with_data(storage).await?;

    let mut chain_oldest_first = vec![event.clone()];
    let mut cursor_block = event.previous_append_block;
    let mut cursor_index = event.leaf_index;
    while i64::from(cursor_index) > h_db + 1 {
        let logs = chain.get_leaf_appended_logs(u64::from(cursor_block), u64::from(cursor_block)).await?;
        let found = logs
            .into_iter()
            .find(|candidate| candidate.leaf_index + 1 == cursor_index)
            .ok_or_else(|| {
                SyncError::Invariant(format!(
                    "walk-back could not find leaf {} at block {cursor_block}",
                    cursor_index - 1
                ))
            })?;
        cursor_block = found.previous_append_block;
        cursor_index = found.leaf_index;
        chain_oldest_first.push(found);
    }
    chain_oldest_first.reverse();

    let first_index = chain_oldest_first[0].leaf_index;
    if u64::from(first_index) != base_leaf_count {
        return Err(SyncError::Invariant(format!(
            "walk-back expected to start at leaf {base_leaf_count}, but oldest recovered leaf is {first_index}"
        )));
    }

    let mut scratch = Mmr::from_state(base_peaks.to_vec(), base_leaf_count);
    for fill_event in &chain_oldest_first {
        let pre_peaks = scratch.peaks().to_vec();
        let pre_root = scratch.root();
        let heights = peak_heights(scratch.leaf_count());

        let record = LeafRecord {
            new_data: fill_event.new_data.clone(),
            event: serde_json::json!({
                "leafIndex": fill_event.leaf_index,
                "previousAppendBlockNumber": fill_event.previous_append_block,
            }),
            block_number: fill_event.block_number,
            root_cid: pre_root.to_string(),
            peaks_with_heights: pre_peaks
                .iter()
                .zip(heights.iter())
                .map(|(cid, height)| PeakWithHeight {
                    cid: cid.to_string(),
                    height: *height,
                })
                .collect(),
        };
        write_leaf_record(storage, fill_event.leaf_index.into(), &record).await?;
        scratch.append(fill_event.leaf_index.into(), fill_event.new_data.clone())?;
    }

    Ok(())
}

/// Writes the DB record for a single event whose index is exactly the next
/// contiguous one (`h_db + 1`), using the live MMR's current pre-state
/// peaks — the common case, with no walk-back required.
pub async fn write_single_event_record(
    storage: &dyn StorageAdapter,
    mmr: &AsyncMutex<Mmr>,
    event: &LeafAppendedEvent,
) -> Result<(), SyncError> {
    let mmr = mmr.lock().await;
    let pre_peaks = mmr.peaks();
    let pre_root = mmr.root();
    let heights = peak_heights(mmr.leaf_count());

    let record = LeafRecord {
        new_data: event.new_data.clone(),
        event: serde_json::json!({
            "leafIndex": event.leaf_index,
            "previousAppendBlockNumber": event.previous_append_block,
            "leftInputs": event.left_inputs.iter().map(accumulator_codec::Cid::to_string).collect::<Vec<_>>(),
        }),
        block_number: event.block_number,
        root_cid: pre_root.to_string(),
        peaks_with_heights: pre_peaks
            .iter()
            .zip(heights.iter())
            .map(|(cid, height)| PeakWithHeight {
                cid: cid.to_string(),
                height: *height,
            })
            .collect(),
    };
    write_leaf_record(storage, event.leaf_index.into(), &record).await?;
    Ok(())
}

/// Commits one leaf to the live MMR: runs `append`, persists the resulting
/// trail (deduplicated), and mirrors each new block to the content-addressed
/// client when enabled.
pub async fn commit_one_leaf_to_mmr(
    storage: &dyn StorageAdapter,
    blockstore: &Arc<BlockStoreClient>,
    mmr: &AsyncMutex<Mmr>,
    index: u64,
    payload: Vec<u8>,
) -> Result<(), SyncError> {
    let trail = mmr.lock().await.append(index, payload)?;
    for block in &trail {
        let newly_appended = append_trail_pair(storage, block).await?;
        if newly_appended && blockstore.put_enabled() {
            match blockstore.put(&block.cid, &block.encoded).await {
                Ok(()) => {
                    if blockstore.provide_enabled() {
                        blockstore.provide(&block.cid).await;
                    }
                }
                Err(err) => {
                    warn!(cid = %block.cid, %err, "block store put failed, continuing without it");
                }
            }
        }
    }
    Ok(())
}

/// Appends leaves `[from, event_leaf_index)` by reading their payload back
/// from storage (they must already be present, or this is an invariant
/// violation), then commits `event_leaf_index` itself.
pub async fn catch_up_mmr_and_commit(
    storage: &dyn StorageAdapter,
    blockstore: &Arc<BlockStoreClient>,
    mmr: &AsyncMutex<Mmr>,
    from: u64,
    event: &LeafAppendedEvent,
) -> Result<(), SyncError> {
    for index in from..u64::from(event.leaf_index) {
        let record = read_leaf_record(storage, index).await?.ok_or_else(|| {
            SyncError::Invariant(format!("leaf {index} missing its payload during MMR catch-up"))
        })?;
        commit_one_leaf_to_mmr(storage, blockstore, mmr, index, record.new_data).await?;
    }
    commit_one_leaf_to_mmr(storage, blockstore, mmr, event.leaf_index.into(), event.new_data.clone()).await
}
