use core::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use nonzero_ext::nonzero;
use parking_lot::Mutex;
use types::{primitives::H256, state::BeaconState};

pub const DEFAULT_STATE_CACHE_SIZE: NonZeroUsize = nonzero!(128_usize);

/// A bounded cache of states keyed by state root.
///
/// This cache is the strong owner of regenerated states. Evicting a state here is what lets the
/// weak entries for it in the dependent-root index die.
pub struct StateCache {
    states: Mutex<LruCache<H256, Arc<BeaconState>>>,
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_CACHE_SIZE)
    }
}

impl StateCache {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            states: Mutex::new(LruCache::new(capacity)),
        }
    }

    #[must_use]
    pub fn get(&self, state_root: H256) -> Option<Arc<BeaconState>> {
        self.states.lock().get(&state_root).cloned()
    }

    pub fn insert(&self, state: Arc<BeaconState>) {
        self.states.lock().put(state.state_root, state);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.lock().is_empty()
    }
}
