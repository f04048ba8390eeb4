//! The backward historical sweep: reconstruct leaf payloads from newest to
//! oldest by chain logs, short-circuiting as soon as a concurrent DAG
//! resolve against the oldest-processed root succeeds.

use std::sync::Arc;

use accumulator_blockstore::BlockStoreClient;
use accumulator_chain::ChainAdapter;
use accumulator_codec::Cid;
use accumulator_mmr::{bag_peaks, peak_heights, previous_root_and_peaks};
use accumulator_storage::{
    enumerate_gaps, highest_contiguous_leaf_index_with_data, write_leaf_payload_only, write_leaf_record, LeafRecord,
    PeakWithHeight, StorageAdapter,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SyncError;

pub const DEFAULT_RANGE_SIZE: u64 = 1000;

/// Runs the backward sweep to completion: on return, storage holds a
/// payload for every leaf index in `[0, leaf_count-1]` (modulo leaves that
/// were already present).
pub async fn sync_backwards_from_latest(
    chain: &ChainAdapter,
    blockstore: Arc<BlockStoreClient>,
    storage: &dyn StorageAdapter,
    range_size: u64,
) -> Result<(), SyncError> {
    let (state, peaks) = chain.get_state().await?;
    if state.leaf_count == 0 {
        info!("chain reports zero leaves, nothing to sweep");
        return Ok(());
    }

    let highest_index = state.leaf_count - 1;
    let h = highest_contiguous_leaf_index_with_data(storage).await?;

    let mut current_peaks = peaks;
    let mut current_root = bag_peaks(&current_peaks);
    // `expected_next` is the leaf index we expect to see next, descending.
    let mut expected_next: i64 = highest_index as i64;
    let mut window_end = state.previous_append_block;
    let deploy_block = state.deploy_block;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut tokens: Vec<CancellationToken> = Vec::new();
    let mut short_circuited = false;

    loop {
        if expected_next < 0 || expected_next <= h {
            debug!(expected_next, h, "local data already covers the remaining range, stopping sweep");
            break;
        }

        let window_start = window_end.saturating_sub(range_size.saturating_sub(1)).max(deploy_block);
        let mut events = chain.get_leaf_appended_logs(window_start, window_end).await?;
        events.sort_by(|a, b| b.leaf_index.cmp(&a.leaf_index));

        for event in events {
            if i64::from(event.leaf_index) != expected_next {
                return Err(SyncError::Invariant(format!(
                    "expected descending leaf_index {expected_next}, got {}",
                    event.leaf_index
                )));
            }

            let (prev_root, prev_peaks) =
                previous_root_and_peaks(&current_peaks, &event.new_data, &event.left_inputs);
            let prev_heights = peak_heights(event.leaf_index.into());

            let peaks_with_heights = prev_peaks
                .iter()
                .zip(prev_heights.iter())
                .map(|(cid, height)| PeakWithHeight {
                    cid: cid.to_string(),
                    height: *height,
                })
                .collect();

            let record = LeafRecord {
                new_data: event.new_data.clone(),
                event: serde_json::json!({
                    "leafIndex": event.leaf_index,
                    "previousAppendBlockNumber": event.previous_append_block,
                    "leftInputs": event.left_inputs.iter().map(Cid::to_string).collect::<Vec<_>>(),
                }),
                block_number: event.block_number,
                root_cid: prev_root.to_string(),
                peaks_with_heights,
            };
            write_leaf_record(storage, event.leaf_index.into(), &record).await?;

            current_peaks = prev_peaks;
            current_root = prev_root;
            expected_next -= 1;
        }

        let token = CancellationToken::new();
        tokens.push(token.clone());
        let source = blockstore.clone();
        let root_to_try = current_root;
        let txc = tx.clone();
        tokio::spawn(async move {
            let result = accumulator_dagwalk::resolve_tree(root_to_try, source.as_ref(), token).await;
            let _ = txc.send((root_to_try, result));
        });

        while let Ok((_root, result)) = rx.try_recv() {
            if let Ok(leaves) = result {
                for other in &tokens {
                    other.cancel();
                }
                for (index, payload) in leaves.iter().enumerate() {
                    let index = index as u64;
                    if storage.get(&format!("leaf:{index}:newData")).await?.is_none() {
                        write_leaf_payload_only(storage, index, payload).await?;
                    }
                }
                short_circuited = true;
                break;
            }
        }

        if short_circuited {
            break;
        }
        if window_start <= deploy_block {
            debug!("reached deploy block with no short-circuit, full sweep completing");
            break;
        }
        window_end = window_start.saturating_sub(1);
    }

    if !short_circuited {
        for token in &tokens {
            token.cancel();
        }
    }

    let gaps = enumerate_gaps(storage, highest_index).await?;
    if !gaps.is_empty() {
        warn!(?gaps, "backward sweep finished with gaps remaining");
        return Err(SyncError::Invariant(format!(
            "backward sweep left {} gap(s) in [0, {highest_index}]",
            gaps.len()
        )));
    }

    storage.persist().await?;
    Ok(())
}
