use std::sync::Arc;

use crate::{
    nonstandard::RelativeEpoch,
    primitives::{Epoch, Slot, ValidatorIndex, H256},
};

/// An attester shuffling tagged with the epoch it applies to.
///
/// The tag lets cache probes reject a shuffling registered for a different epoch under the same
/// dependent root, which can happen for epochs clamped at genesis.
#[derive(Clone, PartialEq, Eq, Default, Debug)]
pub struct EpochShuffling {
    pub epoch: Epoch,
    pub shuffling: Arc<[ValidatorIndex]>,
}

/// A consensus state at some slot, reduced to the attributes the regeneration core reads.
///
/// States are shared. The state cache is the strong owner; auxiliary indices hold weak
/// references. `BeaconState.state_root` is the hash tree root of the full state the summary was
/// derived from and is authoritative for cache keys and head comparisons.
#[derive(Clone, PartialEq, Eq, Default, Debug)]
pub struct BeaconState {
    pub slot: Slot,
    pub state_root: H256,
    /// Proposer indices for the state's current epoch, one per slot of the epoch.
    pub proposers: Arc<[ValidatorIndex]>,
    pub previous_shuffling: EpochShuffling,
    pub current_shuffling: EpochShuffling,
    pub next_shuffling: EpochShuffling,
}

impl BeaconState {
    #[must_use]
    pub fn shuffling(&self, relative_epoch: RelativeEpoch) -> &EpochShuffling {
        match relative_epoch {
            RelativeEpoch::Previous => &self.previous_shuffling,
            RelativeEpoch::Current => &self.current_shuffling,
            RelativeEpoch::Next => &self.next_shuffling,
        }
    }
}
