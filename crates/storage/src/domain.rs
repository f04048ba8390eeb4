//! Domain operations layered over the raw [`StorageAdapter`] contract: leaf
//! record sharding, the trail append log, the contiguity probe, gap
//! enumeration, and the payload-slice index. None of this is part of the
//! key/value contract itself — it's a set of key-naming conventions plus the
//! read/write helpers that honor them.

use std::collections::BTreeMap;

use accumulator_codec::{verify_cid_checked, Cid, EncodedBlock};
use serde::{Deserialize, Serialize};

use crate::adapter::StorageAdapter;
use crate::error::StorageError;

fn leaf_key(index: u64, field: &str) -> String {
    format!("leaf:{index}:{field}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakWithHeight {
    pub cid: String,
    pub height: u8,
}

/// Everything recorded for one committed leaf. `event` is the raw decoded
/// `LeafAppended` event, kept as an opaque JSON blob — this layer doesn't
/// need to interpret it, only round-trip it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeafRecord {
    pub new_data: Vec<u8>,
    pub event: serde_json::Value,
    pub block_number: u64,
    pub root_cid: String,
    pub peaks_with_heights: Vec<PeakWithHeight>,
}

/// Writes every shard of a leaf record. Presence of `leaf:{i}:newData`
/// afterwards is what defines "the leaf is in the DB."
pub async fn write_leaf_record(
    storage: &dyn StorageAdapter,
    index: u64,
    record: &LeafRecord,
) -> Result<(), StorageError> {
    storage
        .put(&leaf_key(index, "newData"), hex::encode(&record.new_data))
        .await?;
    storage
        .put(&leaf_key(index, "event"), record.event.to_string())
        .await?;
    storage
        .put(&leaf_key(index, "blockNumber"), record.block_number.to_string())
        .await?;
    storage
        .put(&leaf_key(index, "rootCid"), record.root_cid.clone())
        .await?;
    storage
        .put(
            &leaf_key(index, "peaksWithHeights"),
            serde_json::to_string(&record.peaks_with_heights)?,
        )
        .await?;
    Ok(())
}

/// Writes only the `newData` shard for a leaf — enough to satisfy the
/// contiguity probe and gap detector. Used when a leaf's payload was
/// recovered by resolving the DAG rather than from a decoded chain event,
/// so the other shards (`event`, `blockNumber`, ...) aren't available.
pub async fn write_leaf_payload_only(
    storage: &dyn StorageAdapter,
    index: u64,
    payload: &[u8],
) -> Result<(), StorageError> {
    storage.put(&leaf_key(index, "newData"), hex::encode(payload)).await
}

/// Reads back a leaf record. Returns `Ok(None)` only when `newData` is
/// absent; any other shard missing or malformed is an [`StorageError`].
pub async fn read_leaf_record(
    storage: &dyn StorageAdapter,
    index: u64,
) -> Result<Option<LeafRecord>, StorageError> {
    let Some(new_data_hex) = storage.get(&leaf_key(index, "newData")).await? else {
        return Ok(None);
    };
    let malformed = |reason: &str| StorageError::MalformedRecord {
        index,
        reason: reason.to_owned(),
    };

    let new_data = hex::decode(&new_data_hex).map_err(|_| malformed("newData is not valid hex"))?;

    let event_raw = storage
        .get(&leaf_key(index, "event"))
        .await?
        .ok_or_else(|| malformed("event shard missing"))?;
    let event: serde_json::Value = serde_json::from_str(&event_raw)?;

    let block_number = storage
        .get(&leaf_key(index, "blockNumber"))
        .await?
        .ok_or_else(|| malformed("blockNumber shard missing"))?
        .parse::<u64>()
        .map_err(|_| malformed("blockNumber is not a valid integer"))?;

    let root_cid = storage
        .get(&leaf_key(index, "rootCid"))
        .await?
        .ok_or_else(|| malformed("rootCid shard missing"))?;

    let peaks_raw = storage
        .get(&leaf_key(index, "peaksWithHeights"))
        .await?
        .ok_or_else(|| malformed("peaksWithHeights shard missing"))?;
    let peaks_with_heights: Vec<PeakWithHeight> = serde_json::from_str(&peaks_raw)?;

    Ok(Some(LeafRecord {
        new_data,
        event,
        block_number,
        root_cid,
        peaks_with_heights,
    }))
}

/// The largest `N` such that `leaf:0:newData` … `leaf:N:newData` all exist;
/// `-1` if `leaf:0:newData` is absent.
pub async fn highest_contiguous_leaf_index_with_data(
    storage: &dyn StorageAdapter,
) -> Result<i64, StorageError> {
    let mut highest: i64 = -1;
    loop {
        let next = (highest + 1) as u64;
        if storage.get(&leaf_key(next, "newData")).await?.is_some() {
            highest = next as i64;
        } else {
            break;
        }
    }
    Ok(highest)
}

/// The sorted list of `i` in `[0, n]` whose `newData` shard is missing.
pub async fn enumerate_gaps(storage: &dyn StorageAdapter, n: u64) -> Result<Vec<u64>, StorageError> {
    let mut gaps = Vec::new();
    for i in 0..=n {
        if storage.get(&leaf_key(i, "newData")).await?.is_none() {
            gaps.push(i);
        }
    }
    Ok(gaps)
}

/// Builds the payload-slice index: for every leaf whose payload is at least
/// `offset + length` bytes, maps the hex of `new_data[offset..offset+length]`
/// to the list of leaf keys carrying it.
pub async fn create_index_by_payload_slice(
    storage: &dyn StorageAdapter,
    offset: usize,
    length: usize,
) -> Result<BTreeMap<String, Vec<String>>, StorageError> {
    let mut index: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in storage.iterate("leaf:").await? {
        let Some(rest) = key.strip_prefix("leaf:") else {
            continue;
        };
        let Some((idx_str, field)) = rest.split_once(':') else {
            continue;
        };
        if field != "newData" {
            continue;
        }
        let Ok(bytes) = hex::decode(&value) else {
            continue;
        };
        if bytes.len() < offset + length {
            continue;
        }
        let slice_hex = hex::encode(&bytes[offset..offset + length]);
        index.entry(slice_hex).or_default().push(format!("leaf:{idx_str}"));
    }
    Ok(index)
}

fn trail_index_key(n: u64) -> String {
    format!("dag:trail:index:{n}")
}

const TRAIL_MAX_INDEX_KEY: &str = "dag:trail:maxIndex";

fn cid_sentinel_key(cid: &Cid) -> String {
    format!("cid:{cid}")
}

#[derive(Serialize, Deserialize)]
struct TrailEntry {
    cid: String,
    encoded: String,
}

/// Returns the current `dag:trail:maxIndex`, or `None` if the log is empty.
pub async fn trail_max_index(storage: &dyn StorageAdapter) -> Result<Option<u64>, StorageError> {
    match storage.get(TRAIL_MAX_INDEX_KEY).await? {
        Some(raw) => Ok(Some(raw.parse::<u64>().map_err(|_| {
            StorageError::Invariant(format!("dag:trail:maxIndex is not a valid integer: {raw}"))
        })?)),
        None => Ok(None),
    }
}

/// Appends one trail block to the log. Verifies the CID against the
/// encoded bytes, then skips the write entirely if the dedup sentinel for
/// this CID is already present — otherwise increments `maxIndex` and writes
/// the pair plus the sentinel. Returns `true` if the block was newly
/// appended, `false` if it was a duplicate.
pub async fn append_trail_pair(
    storage: &dyn StorageAdapter,
    block: &EncodedBlock,
) -> Result<bool, StorageError> {
    verify_cid_checked(&block.encoded, &block.cid)?;

    let sentinel_key = cid_sentinel_key(&block.cid);
    if storage.get(&sentinel_key).await?.is_some() {
        return Ok(false);
    }

    let next_index = match trail_max_index(storage).await? {
        Some(max) => max + 1,
        None => 0,
    };

    let entry = TrailEntry {
        cid: block.cid.to_string(),
        encoded: hex::encode(&block.encoded),
    };
    storage
        .put(&trail_index_key(next_index), serde_json::to_string(&entry)?)
        .await?;
    storage
        .put(TRAIL_MAX_INDEX_KEY, next_index.to_string())
        .await?;
    storage.put(&sentinel_key, "1".to_owned()).await?;

    Ok(true)
}

/// Reads back one trail entry by its log index.
pub async fn read_trail_pair(
    storage: &dyn StorageAdapter,
    n: u64,
) -> Result<Option<(Cid, Vec<u8>)>, StorageError> {
    let Some(raw) = storage.get(&trail_index_key(n)).await? else {
        return Ok(None);
    };
    let entry: TrailEntry = serde_json::from_str(&raw)?;
    let cid = Cid::from_str_form(&entry.cid)?;
    let encoded = hex::decode(&entry.encoded)
        .map_err(|_| StorageError::Invariant(format!("trail entry {n} has non-hex encoded bytes")))?;
    Ok(Some((cid, encoded)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::InMemoryStorage;
    use accumulator_codec::{encode_block, Value};

    async fn open_store() -> InMemoryStorage {
        let storage = InMemoryStorage::new();
        storage.open().await.unwrap();
        storage
    }

    #[tokio::test]
    async fn leaf_record_roundtrip() {
        let storage = open_store().await;
        let record = LeafRecord {
            new_data: vec![0xDE, 0xAD],
            event: serde_json::json!({"leafIndex": 0}),
            block_number: 42,
            root_cid: "bafy...".to_owned(),
            peaks_with_heights: vec![PeakWithHeight {
                cid: "bafy...".to_owned(),
                height: 0,
            }],
        };
        write_leaf_record(&storage, 0, &record).await.unwrap();
        let read_back = read_leaf_record(&storage, 0).await.unwrap().unwrap();
        assert_eq!(read_back.new_data, record.new_data);
        assert_eq!(read_back.block_number, 42);
    }

    #[tokio::test]
    async fn contiguity_probe_and_gaps() {
        let storage = open_store().await;
        assert_eq!(highest_contiguous_leaf_index_with_data(&storage).await.unwrap(), -1);

        for i in [0_u64, 1, 2, 4] {
            let record = LeafRecord {
                new_data: vec![i as u8],
                event: serde_json::Value::Null,
                block_number: i,
                root_cid: String::new(),
                peaks_with_heights: vec![],
            };
            write_leaf_record(&storage, i, &record).await.unwrap();
        }

        assert_eq!(highest_contiguous_leaf_index_with_data(&storage).await.unwrap(), 2);
        assert_eq!(enumerate_gaps(&storage, 4).await.unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn trail_append_dedupes_and_increments_max_index() {
        let storage = open_store().await;
        let block = encode_block(&Value::leaf(vec![1, 2, 3]));

        assert!(append_trail_pair(&storage, &block).await.unwrap());
        assert_eq!(trail_max_index(&storage).await.unwrap(), Some(0));

        assert!(!append_trail_pair(&storage, &block).await.unwrap());
        assert_eq!(trail_max_index(&storage).await.unwrap(), Some(0));

        let other = encode_block(&Value::leaf(vec![4, 5, 6]));
        assert!(append_trail_pair(&storage, &other).await.unwrap());
        assert_eq!(trail_max_index(&storage).await.unwrap(), Some(1));

        let (cid, encoded) = read_trail_pair(&storage, 1).await.unwrap().unwrap();
        assert_eq!(cid, other.cid);
        assert_eq!(encoded, other.encoded);
    }

    #[tokio::test]
    async fn payload_slice_index_groups_matching_leaves() {
        let storage = open_store().await;
        for (i, payload) in [vec![0xAA, 0x01], vec![0xAA, 0x02], vec![0xBB, 0x03]]
            .into_iter()
            .enumerate()
        {
            let record = LeafRecord {
                new_data: payload,
                event: serde_json::Value::Null,
                block_number: i as u64,
                root_cid: String::new(),
                peaks_with_heights: vec![],
            };
            write_leaf_record(&storage, i as u64, &record).await.unwrap();
        }

        let index = create_index_by_payload_slice(&storage, 0, 1).await.unwrap();
        assert_eq!(index.get("aa").unwrap().len(), 2);
        assert_eq!(index.get("bb").unwrap().len(), 1);
    }
}
