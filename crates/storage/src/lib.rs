//! The storage contract and the domain conventions layered over it: leaf
//! record sharding, the trail append log, the contiguity probe, gap
//! enumeration, and the payload-slice index.

pub mod adapter;
pub mod domain;
pub mod error;

pub use adapter::{InMemoryStorage, JsonFileStorage, StorageAdapter};
pub use domain::{
    append_trail_pair, create_index_by_payload_slice, enumerate_gaps,
    highest_contiguous_leaf_index_with_data, read_leaf_record, read_trail_pair, trail_max_index,
    write_leaf_payload_only, write_leaf_record, LeafRecord, PeakWithHeight,
};
pub use error::StorageError;
