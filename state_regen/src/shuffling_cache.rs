use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Weak},
};

use enum_map::EnumMap;
use helper_functions::misc;
use log::debug;
use parking_lot::Mutex;
use types::{
    nonstandard::RelativeEpoch,
    preset::Preset,
    primitives::{Epoch, ValidatorIndex, H256},
    state::BeaconState,
};

use crate::{
    dependent_root::dependent_root_at_epoch,
    interfaces::{BlockSummary, ForkChoice},
};

pub const DEFAULT_EPOCHS_RETAINED_AFTER_FINALITY: u64 = 4;

type DependentRootMap = HashMap<H256, Vec<Weak<BeaconState>>>;
type EpochMap = BTreeMap<Epoch, DependentRootMap>;

/// Weak index of live states by `(tier, decision epoch, dependent root)`.
///
/// A state at epoch `E` is indexed three times: in the `Next` tier at `E`, in the `Current` tier
/// at `E - 1`, and in the `Previous` tier at `E - 2`, each under the dependent root at the
/// registration epoch. A probe of tier `T` therefore reads the shuffling field named by `T` from
/// whatever live state it finds. References are weak so the index never outlives the state
/// cache's ownership; dead references are dropped in place whenever a bucket is read.
pub struct ShufflingCache {
    epochs_retained_after_finality: u64,
    tiers: Mutex<EnumMap<RelativeEpoch, EpochMap>>,
}

impl Default for ShufflingCache {
    fn default() -> Self {
        Self::new(DEFAULT_EPOCHS_RETAINED_AFTER_FINALITY)
    }
}

impl ShufflingCache {
    #[must_use]
    pub fn new(epochs_retained_after_finality: u64) -> Self {
        Self {
            epochs_retained_after_finality,
            tiers: Mutex::new(EnumMap::default()),
        }
    }

    pub fn insert(
        &self,
        relative_epoch: RelativeEpoch,
        epoch: Epoch,
        dependent_root: H256,
        state: &Arc<BeaconState>,
    ) {
        self.tiers.lock()[relative_epoch]
            .entry(epoch)
            .or_default()
            .entry(dependent_root)
            .or_default()
            .push(Arc::downgrade(state));
    }

    /// Proposer indices for `epoch` decided at `dependent_root`, from the first live state whose
    /// current epoch matches.
    #[must_use]
    pub fn proposers(&self, epoch: Epoch, dependent_root: H256) -> Option<Arc<[ValidatorIndex]>> {
        self.first_live(RelativeEpoch::Next, epoch, dependent_root, |state| {
            (state.current_shuffling.epoch == epoch).then(|| state.proposers.clone())
        })
    }

    /// Attester shuffling for `epoch` decided at `(decision_epoch, dependent_root)`.
    ///
    /// States at the requested epoch are preferred, then states one epoch earlier, then states
    /// one epoch later. Within a bucket the first live reference wins.
    #[must_use]
    pub fn attester_shuffling(
        &self,
        epoch: Epoch,
        decision_epoch: Epoch,
        dependent_root: H256,
    ) -> Option<Arc<[ValidatorIndex]>> {
        [
            RelativeEpoch::Current,
            RelativeEpoch::Next,
            RelativeEpoch::Previous,
        ]
        .into_iter()
        .find_map(|relative_epoch| {
            self.first_live(relative_epoch, decision_epoch, dependent_root, |state| {
                let shuffling = state.shuffling(relative_epoch);
                (shuffling.epoch == epoch).then(|| shuffling.shuffling.clone())
            })
        })
    }

    /// Drops index entries more than `epochs_retained_after_finality` epochs behind finality.
    pub fn prune(&self, finalized_epoch: Epoch) {
        let min_retained_epoch = finalized_epoch.saturating_sub(self.epochs_retained_after_finality);

        for (_, epoch_map) in self.tiers.lock().iter_mut() {
            *epoch_map = epoch_map.split_off(&min_retained_epoch);
        }
    }

    fn first_live<T>(
        &self,
        relative_epoch: RelativeEpoch,
        epoch: Epoch,
        dependent_root: H256,
        read: impl Fn(&BeaconState) -> Option<T>,
    ) -> Option<T> {
        let mut tiers = self.tiers.lock();

        let references = tiers[relative_epoch]
            .get_mut(&epoch)?
            .get_mut(&dependent_root)?;

        let mut result = None;

        references.retain(|reference| match reference.upgrade() {
            Some(state) => {
                if result.is_none() {
                    result = read(&state);
                }

                true
            }
            None => false,
        });

        result
    }
}

/// Registers `state` in all three tiers under the dependent roots computed from `block`.
/// Registration epochs are clamped at genesis; the epoch tags on the shufflings keep clamped
/// entries from ever serving a wrong epoch.
pub fn register_post_state<P: Preset, F: ForkChoice>(
    shuffling_cache: &ShufflingCache,
    fork_choice: &F,
    state: &Arc<BeaconState>,
    block: &BlockSummary,
) {
    let state_epoch = misc::compute_epoch_at_slot::<P>(state.slot);

    for (relative_epoch, epochs_back) in [
        (RelativeEpoch::Next, 0),
        (RelativeEpoch::Current, 1),
        (RelativeEpoch::Previous, 2),
    ] {
        let epoch = state_epoch.saturating_sub(epochs_back);

        match dependent_root_at_epoch::<P, _>(fork_choice, block, epoch) {
            Ok(dependent_root) => {
                shuffling_cache.insert(relative_epoch, epoch, dependent_root, state);
            }
            Err(error) => {
                debug!("skipping shuffling index registration at epoch {epoch}: {error}");
            }
        }
    }
}
