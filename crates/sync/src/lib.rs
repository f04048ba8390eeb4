//! Ties the chain, storage, block-store, DAG-walk, and MMR crates into the
//! sync pipeline: the one-time backward historical sweep, the ongoing live
//! sync loop, and operator-initiated republishing.

pub mod backward;
pub mod error;
pub mod leaf_commit;
pub mod live;
pub mod pipeline_state;
pub mod republish;

pub use backward::{sync_backwards_from_latest, DEFAULT_RANGE_SIZE};
pub use error::SyncError;
pub use leaf_commit::LeafSubscriber;
pub use live::{process_new_leaf_event, start_live_sync, DEFAULT_POLL_INTERVAL, SUBSCRIPTION_PROBE_TIMEOUT};
pub use pipeline_state::{PipelineState, SyncHandle};
pub use republish::{republish_trail, RepublishReport};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use accumulator_blockstore::{BlockStoreClient, BlockStoreConfig};
    use accumulator_mmr::Mmr;
    use accumulator_storage::{highest_contiguous_leaf_index_with_data, InMemoryStorage, StorageAdapter};
    use tokio::sync::Mutex as AsyncMutex;
    use url::Url;

    use super::*;
    use crate::leaf_commit::{catch_up_mmr_and_commit, write_single_event_record};

    fn blockstore_disabled() -> Arc<BlockStoreClient> {
        let config = BlockStoreConfig::new(Url::parse("http://localhost:5001/").unwrap());
        Arc::new(BlockStoreClient::new(config))
    }

    fn event(leaf_index: u32, new_data: Vec<u8>, block_number: u64) -> accumulator_chain::LeafAppendedEvent {
        accumulator_chain::LeafAppendedEvent {
            leaf_index,
            previous_append_block: block_number.saturating_sub(1) as u32,
            new_data,
            left_inputs: vec![],
            block_number,
        }
    }

    #[tokio::test]
    async fn next_contiguous_event_commits_to_both_db_and_mmr() {
        let storage = InMemoryStorage::new();
        storage.open().await.unwrap();
        let blockstore = blockstore_disabled();
        let mmr = AsyncMutex::new(Mmr::new());

        let first = event(0, vec![1, 2, 3], 10);
        write_single_event_record(&storage, &mmr, &first).await.unwrap();
        catch_up_mmr_and_commit(&storage, &blockstore, &mmr, 0, &first).await.unwrap();

        assert_eq!(mmr.lock().await.leaf_count(), 1);
        assert_eq!(
            highest_contiguous_leaf_index_with_data(&storage).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn duplicate_event_is_a_no_op_for_the_mmr() {
        let storage = InMemoryStorage::new();
        storage.open().await.unwrap();
        let blockstore = blockstore_disabled();
        let mmr = AsyncMutex::new(Mmr::new());

        let first = event(0, vec![9], 5);
        write_single_event_record(&storage, &mmr, &first).await.unwrap();
        catch_up_mmr_and_commit(&storage, &blockstore, &mmr, 0, &first).await.unwrap();

        let (root_before, leaf_count_before) = {
            let guard = mmr.lock().await;
            (guard.root(), guard.leaf_count())
        };

        // Re-delivering leaf 0 must be detected by the caller via h_mmr before
        // ever reaching `catch_up_mmr_and_commit` again; this test exercises
        // that the DB side alone recognizes it as already present.
        assert_eq!(
            highest_contiguous_leaf_index_with_data(&storage).await.unwrap(),
            0
        );
        let guard = mmr.lock().await;
        assert_eq!(guard.root(), root_before);
        assert_eq!(guard.leaf_count(), leaf_count_before);
    }

    #[tokio::test]
    async fn catch_up_commits_a_run_of_leaves_in_order() {
        let storage = InMemoryStorage::new();
        storage.open().await.unwrap();
        let blockstore = blockstore_disabled();
        let mmr = AsyncMutex::new(Mmr::new());

        for i in 0..3_u32 {
            let ev = event(i, vec![i as u8], u64::from(i) + 1);
            accumulator_storage::write_leaf_record(
                &storage,
                u64::from(i),
                &accumulator_storage::LeafRecord {
                    new_data: ev.new_data.clone(),
                    event: serde_json::json!({}),
                    block_number: ev.block_number,
                    root_cid: String::new(),
                    peaks_with_heights: vec![],
                },
            )
            .await
            .unwrap();
        }

        let latest = event(3, vec![3], 4);
        catch_up_mmr_and_commit(&storage, &blockstore, &mmr, 0, &latest).await.unwrap();

        assert_eq!(mmr.lock().await.leaf_count(), 4);
    }

    #[tokio::test]
    async fn republish_with_blockstore_disabled_counts_nothing() {
        let storage = InMemoryStorage::new();
        storage.open().await.unwrap();
        let blockstore = blockstore_disabled();
        let mmr = AsyncMutex::new(Mmr::new());

        let ev = event(0, vec![1], 1);
        write_single_event_record(&storage, &mmr, &ev).await.unwrap();
        catch_up_mmr_and_commit(&storage, &blockstore, &mmr, 0, &ev).await.unwrap();

        let report = republish_trail(&storage, &blockstore).await.unwrap();
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failed, 0);
    }
}
