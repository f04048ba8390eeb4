//! The public façade: `open`/`start`/`shutdown`, the read-side `Dataset`
//! (`data.*`), and live-sync control (`sync.*`). This is the crate a thin
//! CLI or service layer would depend on directly; no such layer is built
//! here.

pub mod client;
pub mod config;
pub mod dataset;

pub use accumulator_sync::SyncHandle;
pub use client::AccumulatorClient;
pub use config::{BlockStoreSettings, ChainSettings, ClientConfig, StorageBackend};
pub use dataset::{Dataset, DatasetDump, LeafCallback, PeakSummary, Unsubscribe};

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use accumulator_sync::LeafSubscriber;
    use url::Url;

    use super::*;

    fn test_config() -> ClientConfig {
        ClientConfig::new(
            Url::parse("http://127.0.0.1:8545/").unwrap(),
            "0x0000000000000000000000000000000000000001".to_owned(),
        )
    }

    #[tokio::test]
    async fn open_on_empty_storage_yields_an_empty_dataset() {
        let client = AccumulatorClient::open(test_config()).await.unwrap();
        let dataset = client.data();

        assert_eq!(dataset.highest_index().await.unwrap(), -1);
        let dump = dataset.dump().await.unwrap();
        assert_eq!(dump.leaf_count, 0);
        assert_eq!(dump.highest_contiguous_index, -1);
    }

    #[tokio::test]
    async fn subscribe_then_unsubscribe_stops_delivering_callbacks() {
        let client = AccumulatorClient::open(test_config()).await.unwrap();
        let dataset = client.data();

        let count = Arc::new(AtomicU64::new(0));
        let count_clone = count.clone();
        let subscription = dataset.subscribe(Box::new(move |_index, _hex| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        dataset.fan_out.on_leaf(0, "ab");
        assert_eq!(count.load(Ordering::SeqCst), 1);

        subscription.unsubscribe();
        dataset.fan_out.on_leaf(1, "cd");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
