//! Operator-initiated re-pin: walks the entire trail log and pushes every
//! block back to the content-addressed client. Never aborts on a single
//! failure — it's a best-effort re-pin, not a correctness requirement.

use std::sync::Arc;

use accumulator_blockstore::BlockStoreClient;
use accumulator_codec::verify_cid;
use accumulator_storage::{read_trail_pair, trail_max_index, StorageAdapter};
use tracing::warn;

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, Default)]
pub struct RepublishReport {
    pub succeeded: u64,
    pub failed: u64,
    pub skipped_corrupt: u64,
}

/// Re-verifies and re-pushes every entry in the trail log, `0..=maxIndex`.
pub async fn republish_trail(
    storage: &dyn StorageAdapter,
    blockstore: &Arc<BlockStoreClient>,
) -> Result<RepublishReport, SyncError> {
    let mut report = RepublishReport::default();

    let Some(max_index) = trail_max_index(storage).await? else {
        return Ok(report);
    };

    for n in 0..=max_index {
        let Some((cid, encoded)) = read_trail_pair(storage, n).await? else {
            warn!(index = n, "trail log entry missing while republishing, skipping");
            report.skipped_corrupt += 1;
            continue;
        };

        if !verify_cid(&encoded, &cid) {
            warn!(index = n, %cid, "trail log entry failed CID verification, skipping");
            report.skipped_corrupt += 1;
            continue;
        }

        if !blockstore.put_enabled() {
            continue;
        }

        match blockstore.put(&cid, &encoded).await {
            Ok(()) => {
                report.succeeded += 1;
                if blockstore.provide_enabled() {
                    blockstore.provide(&cid).await;
                }
            }
            Err(err) => {
                warn!(index = n, %cid, %err, "republish put failed, continuing to next entry");
                report.failed += 1;
            }
        }
    }

    Ok(report)
}
