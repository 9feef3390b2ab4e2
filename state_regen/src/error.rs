use thiserror::Error;
use types::primitives::{Epoch, Slot, H256};

#[derive(Debug, Error)]
pub enum Error {
    #[error("block not present in fork choice: {root:?}")]
    BlockNotInForkChoice { root: H256 },
    #[error("head state is not available yet")]
    HeadUnavailable,
    #[error("dependent root at epoch {epoch} precedes the finalized checkpoint")]
    BeforeFinalized { epoch: Epoch },
    #[error("dependent root resolution exhausted ancestors of {block_root:?} before slot {slot}")]
    Unresolvable { block_root: H256, slot: Slot },
    #[error("regeneration queue is at capacity")]
    QueueFull,
    #[error("regeneration was cancelled")]
    Cancelled,
    #[error("state transition failed")]
    Transition(#[source] anyhow::Error),
    #[error("persistent state read failed")]
    Persistent(#[source] anyhow::Error),
}
