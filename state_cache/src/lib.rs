pub use crate::{
    checkpoint_state_cache::CheckpointStateCache,
    state_cache::{StateCache, DEFAULT_STATE_CACHE_SIZE},
};

mod checkpoint_state_cache;
mod state_cache;
