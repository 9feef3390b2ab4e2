use std::sync::Arc;

use anyhow::Result;
use types::{
    containers::Checkpoint,
    primitives::{Epoch, Slot, H256},
    state::BeaconState,
};

/// A fork choice node reduced to the attributes regeneration reads.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct BlockSummary {
    pub block_root: H256,
    pub parent_root: H256,
    pub state_root: H256,
    pub slot: Slot,
    /// Root of the first block of this block's epoch on its ancestor chain, or the block itself.
    /// Dependent root resolution uses it to skip a whole epoch of blocks per hop.
    pub target_root: H256,
}

/// Read-only view of the fork choice DAG.
pub trait ForkChoice: Send + Sync + 'static {
    fn block(&self, block_root: H256) -> Option<BlockSummary>;

    fn block_by_state_root(&self, state_root: H256) -> Option<BlockSummary>;

    fn finalized_checkpoint(&self) -> Checkpoint;
}

/// The state transition function.
///
/// Calls are expensive and may block. The regen worker is the only caller apart from the
/// forward-dialing head queries.
pub trait StateTransition: Send + Sync + 'static {
    fn process_slots(&self, state: Arc<BeaconState>, slot: Slot) -> Result<Arc<BeaconState>>;

    /// Advances `state` to the last epoch boundary at or before `slot`.
    fn process_slots_to_nearest_checkpoint(
        &self,
        state: Arc<BeaconState>,
        slot: Slot,
    ) -> Result<Arc<BeaconState>>;

    fn process_block(
        &self,
        pre_state: Arc<BeaconState>,
        block: &BlockSummary,
    ) -> Result<Arc<BeaconState>>;
}

/// Read-only access to checkpoint states in the persistent store.
pub trait StateReader: Send + Sync + 'static {
    fn checkpoint_state(
        &self,
        epoch: Epoch,
        dependent_root: H256,
    ) -> Result<Option<Arc<BeaconState>>>;
}
