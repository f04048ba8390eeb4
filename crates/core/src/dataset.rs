//! The read-side façade: `data.*` from the spec's public API list, backed
//! jointly by storage (payload/event history) and the live MMR (peaks/root).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use accumulator_mmr::Mmr;
use accumulator_storage::{
    create_index_by_payload_slice, highest_contiguous_leaf_index_with_data, read_leaf_record, LeafRecord,
    StorageAdapter,
};
use accumulator_sync::LeafSubscriber;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;

pub type LeafCallback = Box<dyn Fn(u64, &str) + Send + Sync>;

/// Fans a single committed-leaf notification out to every callback
/// registered through [`Dataset::subscribe`]. Registered once with the
/// sync pipeline as its sole [`LeafSubscriber`]; everything above this
/// point is plain callback bookkeeping, not part of the pipeline itself.
pub(crate) struct FanOutSubscriber {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, LeafCallback)>>,
}

impl FanOutSubscriber {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    fn add(&self, callback: LeafCallback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.callbacks.lock().push((id, callback));
        id
    }

    fn remove(&self, id: u64) -> bool {
        let mut callbacks = self.callbacks.lock();
        match callbacks.iter().position(|(existing, _)| *existing == id) {
            Some(pos) => {
                callbacks.swap_remove(pos);
                true
            }
            None => false,
        }
    }
}

impl LeafSubscriber for FanOutSubscriber {
    fn on_leaf(&self, index: u64, new_data_hex: &str) {
        for (_, callback) in self.callbacks.lock().iter() {
            callback(index, new_data_hex);
        }
    }
}

impl LeafSubscriber for Arc<FanOutSubscriber> {
    fn on_leaf(&self, index: u64, new_data_hex: &str) {
        self.as_ref().on_leaf(index, new_data_hex);
    }
}

/// Returned by [`Dataset::subscribe`]. Call [`Unsubscribe::unsubscribe`] to
/// stop receiving callbacks; dropping it without calling that leaves the
/// subscription active.
pub struct Unsubscribe {
    fan_out: Arc<FanOutSubscriber>,
    id: u64,
}

impl Unsubscribe {
    pub fn unsubscribe(self) {
        self.fan_out.remove(self.id);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PeakSummary {
    pub cid: String,
    pub height: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetDump {
    pub peaks: Vec<PeakSummary>,
    pub leaf_count: u64,
    pub highest_contiguous_index: i64,
    pub root: String,
}

pub struct Dataset {
    pub(crate) storage: Arc<dyn StorageAdapter>,
    pub(crate) mmr: Arc<AsyncMutex<Mmr>>,
    pub(crate) fan_out: Arc<FanOutSubscriber>,
}

impl Dataset {
    /// The largest `N` such that every leaf in `[0, N]` has a payload on
    /// disk; `-1` if leaf 0 itself is missing.
    pub async fn highest_index(&self) -> eyre::Result<i64> {
        Ok(highest_contiguous_leaf_index_with_data(self.storage.as_ref()).await?)
    }

    pub async fn get(&self, index: u64) -> eyre::Result<Option<LeafRecord>> {
        Ok(read_leaf_record(self.storage.as_ref(), index).await?)
    }

    /// Reads `[start, end_inclusive]`, stopping early at the first gap.
    pub async fn range(&self, start: u64, end_inclusive: u64) -> eyre::Result<Vec<LeafRecord>> {
        let mut records = Vec::new();
        for index in start..=end_inclusive {
            match read_leaf_record(self.storage.as_ref(), index).await? {
                Some(record) => records.push(record),
                None => break,
            }
        }
        Ok(records)
    }

    #[must_use]
    pub fn subscribe(&self, callback: LeafCallback) -> Unsubscribe {
        let id = self.fan_out.add(callback);
        Unsubscribe {
            fan_out: self.fan_out.clone(),
            id,
        }
    }

    pub async fn iterate(&self) -> eyre::Result<Vec<(String, String)>> {
        Ok(self.storage.iterate("leaf:").await?)
    }

    pub async fn index_by_payload_slice(
        &self,
        offset: usize,
        length: usize,
    ) -> eyre::Result<BTreeMap<String, Vec<String>>> {
        Ok(create_index_by_payload_slice(self.storage.as_ref(), offset, length).await?)
    }

    /// A diagnostic snapshot: current peaks (with heights), leaf count, the
    /// highest contiguous index on disk, and the root CID.
    pub async fn dump(&self) -> eyre::Result<DatasetDump> {
        let mmr = self.mmr.lock().await;
        let heights = accumulator_mmr::peak_heights(mmr.leaf_count());
        let peaks = mmr
            .peaks()
            .iter()
            .zip(heights.iter())
            .map(|(cid, height)| PeakSummary {
                cid: cid.to_string(),
                height: *height,
            })
            .collect();
        let root = mmr.root().to_string();
        let leaf_count = mmr.leaf_count();
        drop(mmr);

        let highest_contiguous_index = highest_contiguous_leaf_index_with_data(self.storage.as_ref()).await?;

        Ok(DatasetDump {
            peaks,
            leaf_count,
            highest_contiguous_index,
            root,
        })
    }
}
