use core::num::NonZeroUsize;

use state_cache::DEFAULT_STATE_CACHE_SIZE;
use strum::IntoStaticStr;

use crate::shuffling_cache::DEFAULT_EPOCHS_RETAINED_AFTER_FINALITY;

/// Upstream component on whose behalf a regen request is made. Only used to label metrics.
#[derive(Clone, Copy, PartialEq, Eq, Debug, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum RegenCaller {
    HeadState,
    HttpApi,
    PrecomputeEpoch,
    ProduceAttestationData,
    ProduceBlock,
    ValidateGossipAttestation,
    ValidateGossipBlock,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum RegenEntrypoint {
    PreState,
    CheckpointState,
    BlockSlotState,
    State,
}

impl RegenCaller {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

impl RegenEntrypoint {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RegenConfig {
    pub state_cache_size: NonZeroUsize,
    /// How many epochs of dependent root index entries to keep behind the finalized epoch.
    pub epochs_retained_after_finality: u64,
}

impl Default for RegenConfig {
    fn default() -> Self {
        Self {
            state_cache_size: DEFAULT_STATE_CACHE_SIZE,
            epochs_retained_after_finality: DEFAULT_EPOCHS_RETAINED_AFTER_FINALITY,
        }
    }
}
