use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Replaces the mutable setter-closures the sync loop would otherwise
/// thread through every call: the handful of fields live sync reads and
/// advances on every head, owned in one place instead of captured by
/// reference in a pile of callbacks.
pub struct PipelineState {
    pub last_processed_block: u64,
    pub highest_committed_leaf_index: i64,
    running: Arc<AtomicBool>,
}

impl PipelineState {
    #[must_use]
    pub fn new(last_processed_block: u64, highest_committed_leaf_index: i64) -> Self {
        Self {
            last_processed_block,
            highest_committed_leaf_index,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn handle(&self) -> SyncHandle {
        SyncHandle {
            running: self.running.clone(),
        }
    }
}

/// A cloneable handle to stop a running live-sync loop from outside it.
#[derive(Clone)]
pub struct SyncHandle {
    running: Arc<AtomicBool>,
}

impl SyncHandle {
    pub fn stop_live_sync(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
