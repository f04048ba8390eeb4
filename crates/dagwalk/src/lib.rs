//! Depth-first resolution of the dag-cbor tree a root CID names, honoring
//! cancellation at every fetch.

pub mod error;

pub use error::DagWalkError;

use std::future::Future;
use std::pin::Pin;

use accumulator_blockstore::BlockStoreClient;
use accumulator_codec::{cbor, verify_cid_checked, Cid};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Anything `resolve_tree` can fetch blocks from. Implemented for
/// [`BlockStoreClient`]; tests implement it over a plain in-memory map.
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn get(&self, cid: &Cid) -> Result<Vec<u8>, DagWalkError>;
}

#[async_trait]
impl BlockSource for BlockStoreClient {
    async fn get(&self, cid: &Cid) -> Result<Vec<u8>, DagWalkError> {
        Ok(BlockStoreClient::get(self, cid).await?)
    }
}

type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<Vec<u8>>, DagWalkError>> + Send + 'a>>;

/// Resolves `root` into the ordered list of leaf payloads it names: a bare
/// leaf returns itself; a `{L,R}` link resolves left then right and
/// concatenates; a bare-CID shape recurses on the link. Any fetch failure
/// or unexpected shape fails the whole call, and cancellation at any point
/// yields [`DagWalkError::Cancelled`] rather than propagating whatever the
/// in-flight fetch would have returned.
pub fn resolve_tree<'a>(
    root: Cid,
    source: &'a (dyn BlockSource + 'a),
    cancel: CancellationToken,
) -> ResolveFuture<'a> {
    Box::pin(async move {
        let bytes = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(DagWalkError::Cancelled),
            result = source.get(&root) => result?,
        };

        verify_cid_checked(&bytes, &root).map_err(|_| DagWalkError::CidMismatch)?;

        let value = cbor::decode(&bytes)?;
        let node = cbor::node_from_value(&value)?;

        match node {
            cbor::Node::Leaf(payload) => Ok(vec![payload]),
            cbor::Node::BareCid(inner) => resolve_tree(inner, source, cancel).await,
            cbor::Node::Link { l, r } => {
                if cancel.is_cancelled() {
                    return Err(DagWalkError::Cancelled);
                }
                let mut left = resolve_tree(l, source, cancel.clone()).await?;
                let right = resolve_tree(r, source, cancel).await?;
                left.extend(right);
                Ok(left)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use accumulator_codec::{encode_block, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MapSource(Mutex<HashMap<Cid, Vec<u8>>>);

    #[async_trait]
    impl BlockSource for MapSource {
        async fn get(&self, cid: &Cid) -> Result<Vec<u8>, DagWalkError> {
            self.0
                .lock()
                .unwrap()
                .get(cid)
                .cloned()
                .ok_or_else(|| DagWalkError::NotFound(cid.to_string()))
        }
    }

    fn build_three_leaf_tree() -> (Cid, MapSource) {
        let mut map = HashMap::new();
        let leaf0 = encode_block(&Value::leaf(vec![0x01]));
        let leaf1 = encode_block(&Value::leaf(vec![0x02]));
        let leaf2 = encode_block(&Value::leaf(vec![0x03]));
        let h1 = encode_block(&Value::link_node(leaf0.cid, leaf1.cid));
        let root = encode_block(&Value::link_node(h1.cid, leaf2.cid));

        for block in [&leaf0, &leaf1, &leaf2, &h1, &root] {
            map.insert(block.cid, block.encoded.clone());
        }
        (root.cid, MapSource(Mutex::new(map)))
    }

    #[tokio::test]
    async fn resolves_leaves_in_left_to_right_order() {
        let (root, source) = build_three_leaf_tree();
        let cancel = CancellationToken::new();
        let leaves = resolve_tree(root, &source, cancel).await.unwrap();
        assert_eq!(leaves, vec![vec![0x01], vec![0x02], vec![0x03]]);
    }

    #[tokio::test]
    async fn missing_block_fails_the_whole_call() {
        let (root, source) = build_three_leaf_tree();
        source.0.lock().unwrap().clear();
        let cancel = CancellationToken::new();
        let err = resolve_tree(root, &source, cancel).await.unwrap_err();
        assert!(matches!(err, DagWalkError::NotFound(_)));
    }

    #[tokio::test]
    async fn pre_cancelled_token_yields_cancelled_not_not_found() {
        let (root, source) = build_three_leaf_tree();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = resolve_tree(root, &source, cancel).await.unwrap_err();
        assert!(matches!(err, DagWalkError::Cancelled));
    }

    #[tokio::test]
    async fn bare_cid_shape_recurses_on_the_link() {
        let mut map = HashMap::new();
        let leaf = encode_block(&Value::leaf(vec![0x99]));
        let bare = encode_block(&Value::Link(leaf.cid));
        map.insert(leaf.cid, leaf.encoded.clone());
        map.insert(bare.cid, bare.encoded.clone());
        let source = MapSource(Mutex::new(map));

        let leaves = resolve_tree(bare.cid, &source, CancellationToken::new()).await.unwrap();
        assert_eq!(leaves, vec![vec![0x99]]);
    }
}
