use std::sync::Arc;

use parking_lot::Mutex;
use types::{
    primitives::{Epoch, Slot, ValidatorIndex, H256},
    state::BeaconState,
};

/// The current head of the chain together with precomputed shuffling decision roots.
///
/// With the head at epoch `E`, `dependent_root_next` decides the proposer and next shufflings
/// at `E`, `dependent_root_current` the attester shuffling at `E` (decided one epoch back), and
/// `dependent_root_previous` the attester shuffling at `E - 1` (decided two epochs back). A root
/// that could not be resolved is zero, which no real dependent root equals, so comparisons
/// against it simply miss.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct HeadSummary {
    pub block_root: H256,
    pub state_root: H256,
    pub slot: Slot,
    pub epoch: Epoch,
    pub target_root: H256,
    pub dependent_root_next: H256,
    pub dependent_root_current: H256,
    pub dependent_root_previous: H256,
}

struct Head {
    summary: HeadSummary,
    state: Option<Arc<BeaconState>>,
}

/// Tracks the head summary and, when available, its state.
///
/// `state` is `None` until a head state has been produced or recovered; callers observe that as
/// temporary unavailability rather than blocking.
#[derive(Default)]
pub struct HeadTracker {
    head: Mutex<Option<Head>>,
}

impl HeadTracker {
    #[must_use]
    pub fn summary(&self) -> Option<HeadSummary> {
        self.head.lock().as_ref().map(|head| head.summary)
    }

    #[must_use]
    pub fn state(&self) -> Option<Arc<BeaconState>> {
        self.head.lock().as_ref()?.state.clone()
    }

    #[must_use]
    pub fn summary_and_state(&self) -> Option<(HeadSummary, Option<Arc<BeaconState>>)> {
        self.head
            .lock()
            .as_ref()
            .map(|head| (head.summary, head.state.clone()))
    }

    pub(crate) fn set(&self, summary: HeadSummary, state: Option<Arc<BeaconState>>) {
        *self.head.lock() = Some(Head { summary, state });
    }

    /// Installs a regenerated head state unless the head has moved since the regeneration was
    /// requested. Returns whether the state was installed.
    pub(crate) fn try_install_state(&self, state_root: H256, state: &Arc<BeaconState>) -> bool {
        let mut guard = self.head.lock();

        match guard.as_mut() {
            Some(head) if head.summary.state_root == state_root && head.state.is_none() => {
                head.state = Some(state.clone());
                true
            }
            _ => false,
        }
    }

    /// Proposer indices if the head state decides the proposer shuffling at
    /// `(epoch, dependent_root)`.
    #[must_use]
    pub(crate) fn proposers(
        &self,
        epoch: Epoch,
        dependent_root: H256,
    ) -> Option<Arc<[ValidatorIndex]>> {
        let guard = self.head.lock();
        let head = guard.as_ref()?;
        let state = head.state.as_ref()?;

        (head.summary.epoch == epoch && head.summary.dependent_root_next == dependent_root)
            .then(|| state.proposers.clone())
    }

    /// Attester shuffling for `epoch` if the head state covers it and the decision root matches.
    /// The head may serve the shuffling from its current, next, or previous epoch.
    #[must_use]
    pub(crate) fn attester_shuffling(
        &self,
        epoch: Epoch,
        dependent_root: H256,
    ) -> Option<Arc<[ValidatorIndex]>> {
        let guard = self.head.lock();
        let head = guard.as_ref()?;
        let state = head.state.as_ref()?;
        let summary = head.summary;

        let shuffling = if summary.epoch == epoch && summary.dependent_root_current == dependent_root
        {
            &state.current_shuffling
        } else if summary.epoch + 1 == epoch && summary.dependent_root_next == dependent_root {
            &state.next_shuffling
        } else if epoch + 1 == summary.epoch && summary.dependent_root_previous == dependent_root {
            &state.previous_shuffling
        } else {
            return None;
        };

        (shuffling.epoch == epoch).then(|| shuffling.shuffling.clone())
    }
}
