use std::sync::Arc;

use futures::channel::oneshot::Sender as OneshotSender;
use log::debug;
use types::{
    containers::Checkpoint,
    primitives::{Slot, H256},
    state::BeaconState,
};

use crate::{
    error::Error,
    interfaces::BlockSummary,
    misc::{RegenCaller, RegenEntrypoint},
};

pub type ReplySender = OneshotSender<Result<Arc<BeaconState>, Error>>;

pub enum RegenMessage {
    PreState {
        block: BlockSummary,
        caller: RegenCaller,
        reply: ReplySender,
    },
    CheckpointState {
        checkpoint: Checkpoint,
        caller: RegenCaller,
        reply: ReplySender,
    },
    BlockSlotState {
        block_root: H256,
        slot: Slot,
        caller: RegenCaller,
        reply: ReplySender,
    },
    State {
        state_root: H256,
        caller: RegenCaller,
        reply: ReplySender,
    },
    /// Background head state recovery for `set_head`. There is no reply; the worker installs the
    /// state into the head tracker unless the head has moved in the meantime.
    HeadState { state_root: H256 },
    Stop,
}

impl RegenMessage {
    pub(crate) fn labels(&self) -> Option<(RegenCaller, RegenEntrypoint)> {
        match self {
            Self::PreState { caller, .. } => Some((*caller, RegenEntrypoint::PreState)),
            Self::CheckpointState { caller, .. } => {
                Some((*caller, RegenEntrypoint::CheckpointState))
            }
            Self::BlockSlotState { caller, .. } => {
                Some((*caller, RegenEntrypoint::BlockSlotState))
            }
            Self::State { caller, .. } => Some((*caller, RegenEntrypoint::State)),
            Self::HeadState { .. } => Some((RegenCaller::HeadState, RegenEntrypoint::State)),
            Self::Stop => None,
        }
    }

    /// Fails the job without executing it.
    pub(crate) fn reject(self, error: Error) {
        match self {
            Self::PreState { reply, .. }
            | Self::CheckpointState { reply, .. }
            | Self::BlockSlotState { reply, .. }
            | Self::State { reply, .. } => send_reply(reply, Err(error)),
            Self::HeadState { .. } | Self::Stop => {}
        }
    }
}

pub(crate) fn send_reply(reply: ReplySender, result: Result<Arc<BeaconState>, Error>) {
    if reply.send(result).is_err() {
        debug!("reply to regen caller failed because the receiver was dropped");
    }
}
