use std::sync::Arc;

use im::{HashMap, OrdMap};
use parking_lot::Mutex;
use types::{
    containers::Checkpoint,
    primitives::{Epoch, H256},
    state::BeaconState,
};

type EpochMap = OrdMap<Epoch, Arc<BeaconState>>;

/// States at epoch boundaries, keyed by `(block_root, epoch)`.
///
/// Checkpoint states are the most reusable regeneration artifact. Besides exact lookups the
/// cache answers `latest`, the "most recent boundary state at or below an epoch" query that the
/// cross-epoch pre-state fast path relies on.
#[derive(Default)]
pub struct CheckpointStateCache {
    states: Mutex<HashMap<H256, EpochMap>>,
}

impl CheckpointStateCache {
    #[must_use]
    pub fn get(&self, checkpoint: Checkpoint) -> Option<Arc<BeaconState>> {
        self.states
            .lock()
            .get(&checkpoint.root)
            .and_then(|epoch_map| epoch_map.get(&checkpoint.epoch))
            .cloned()
    }

    #[must_use]
    pub fn latest(&self, block_root: H256, max_epoch: Epoch) -> Option<Arc<BeaconState>> {
        self.states
            .lock()
            .get(&block_root)
            .and_then(|epoch_map| epoch_map.get_prev(&max_epoch))
            .map(|(_, state)| state.clone())
    }

    pub fn insert(&self, checkpoint: Checkpoint, state: Arc<BeaconState>) {
        self.states
            .lock()
            .entry(checkpoint.root)
            .or_insert_with(EpochMap::default)
            .insert(checkpoint.epoch, state);
    }

    /// Drops every state at an epoch less than or equal to `last_pruned_epoch`.
    pub fn prune(&self, last_pruned_epoch: Epoch) {
        let mut guard = self.states.lock();

        for (_, epoch_map) in guard.iter_mut() {
            let (_, retained) = epoch_map.split(&last_pruned_epoch);
            *epoch_map = retained;
        }

        guard.retain(|_, epoch_map| !epoch_map.is_empty());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.states
            .lock()
            .iter()
            .map(|(_, epoch_map)| epoch_map.len())
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
