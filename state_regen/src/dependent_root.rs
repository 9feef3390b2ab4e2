use helper_functions::misc;
use types::{
    preset::Preset,
    primitives::{Epoch, H256, GENESIS_EPOCH},
};

use crate::{
    error::Error,
    interfaces::{BlockSummary, ForkChoice},
};

/// Computes the root of the last block whose slot is earlier than the first slot of `epoch` on
/// the ancestor chain of `from`. The post-state of that block decides the shuffling at `epoch`.
///
/// The walk follows `target_root` wherever possible, skipping a whole epoch of blocks per hop,
/// so resolution is linear in epochs walked back rather than in slots.
pub fn dependent_root_at_epoch<P: Preset, F: ForkChoice>(
    fork_choice: &F,
    from: &BlockSummary,
    epoch: Epoch,
) -> Result<H256, Error> {
    let finalized = fork_choice.finalized_checkpoint();

    if epoch == GENESIS_EPOCH {
        return if finalized.epoch == GENESIS_EPOCH {
            Ok(finalized.root)
        } else {
            Err(Error::BeforeFinalized { epoch })
        };
    }

    let target_slot = misc::compute_start_slot_at_epoch::<P>(epoch);
    let mut block = *from;

    loop {
        if block.slot == target_slot {
            return Ok(block.parent_root);
        }

        if block.slot < target_slot {
            return Ok(block.block_root);
        }

        // A block that is first in its epoch is its own target; stepping to the target would
        // not make progress.
        let next_root = if block.block_root == block.target_root {
            block.parent_root
        } else {
            block.target_root
        };

        block = match fork_choice.block(next_root) {
            Some(ancestor) => ancestor,
            None if epoch < finalized.epoch => return Err(Error::BeforeFinalized { epoch }),
            None => {
                return Err(Error::Unresolvable {
                    block_root: from.block_root,
                    slot: target_slot,
                })
            }
        };
    }
}
