// Facade methods either complete synchronously from the caches or submit a message to the regen
// worker and await its reply. Query methods never block on regeneration; operations that need a
// missing state suspend until the single worker produces it.

use core::marker::PhantomData;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        mpsc::Sender,
        Arc,
    },
    thread::{Builder, JoinHandle},
};

use anyhow::{anyhow, Result};
use futures::channel::oneshot::{self, Canceled, Receiver};
use helper_functions::misc;
use log::{debug, warn};
use prometheus_metrics::Metrics;
use state_cache::{CheckpointStateCache, StateCache};
use types::{
    containers::Checkpoint,
    nonstandard::RelativeEpoch,
    preset::Preset,
    primitives::{Epoch, Slot, ValidatorIndex, H256, GENESIS_EPOCH},
    state::BeaconState,
};

use crate::{
    dependent_root::dependent_root_at_epoch,
    error::Error,
    head_tracker::{HeadSummary, HeadTracker},
    interfaces::{BlockSummary, ForkChoice, StateReader, StateTransition},
    messages::RegenMessage,
    misc::{RegenCaller, RegenConfig, RegenEntrypoint},
    queue::RegenQueue,
    shuffling_cache::{register_post_state, ShufflingCache},
    worker::Worker,
};

pub struct Regenerator<P: Preset, F, T, R> {
    fork_choice: Arc<F>,
    transition: Arc<T>,
    state_reader: Arc<R>,
    state_cache: Arc<StateCache>,
    checkpoint_state_cache: Arc<CheckpointStateCache>,
    shuffling_cache: Arc<ShufflingCache>,
    head_tracker: Arc<HeadTracker>,
    queue: RegenQueue,
    last_finalized_epoch: AtomicU64,
    metrics: Option<Arc<Metrics>>,
    phantom: PhantomData<P>,
}

impl<P: Preset, F, T, R> Drop for Regenerator<P, F, T, R> {
    fn drop(&mut self) {
        self.queue.stop();
    }
}

impl<P, F, T, R> Regenerator<P, F, T, R>
where
    P: Preset,
    F: ForkChoice,
    T: StateTransition,
    R: StateReader,
{
    pub fn new(
        config: RegenConfig,
        fork_choice: Arc<F>,
        transition: Arc<T>,
        state_reader: Arc<R>,
        metrics: Option<Arc<Metrics>>,
    ) -> Result<(Arc<Self>, RegenHandle)> {
        let state_cache = Arc::new(StateCache::new(config.state_cache_size));
        let checkpoint_state_cache = Arc::new(CheckpointStateCache::default());
        let shuffling_cache = Arc::new(ShufflingCache::new(config.epochs_retained_after_finality));
        let head_tracker = Arc::new(HeadTracker::default());
        let queue_length = Arc::new(AtomicUsize::new(0));
        let cancelled = Arc::new(AtomicBool::new(false));
        let (regen_tx, regen_rx) = std::sync::mpsc::channel();

        let worker = Worker::<P, _, _, _>::new(
            fork_choice.clone(),
            transition.clone(),
            state_reader.clone(),
            state_cache.clone(),
            checkpoint_state_cache.clone(),
            shuffling_cache.clone(),
            head_tracker.clone(),
            regen_rx,
            queue_length.clone(),
            cancelled.clone(),
            metrics.clone(),
        );

        let join_handle = Builder::new()
            .name("state-regen".to_owned())
            .spawn(|| worker.run())?;

        let queue = RegenQueue::new(
            regen_tx.clone(),
            queue_length,
            cancelled.clone(),
            metrics.clone(),
        );

        let regenerator = Arc::new(Self {
            fork_choice,
            transition,
            state_reader,
            state_cache,
            checkpoint_state_cache,
            shuffling_cache,
            head_tracker,
            queue,
            last_finalized_epoch: AtomicU64::new(GENESIS_EPOCH),
            metrics,
            phantom: PhantomData,
        });

        let handle = RegenHandle {
            join_handle: Some(join_handle),
            regen_tx,
            cancelled,
        };

        Ok((regenerator, handle))
    }

    /// Returns the pre-state for `block`, the state its parent chain produces at `block.slot`.
    ///
    /// In-epoch pre-states are reusable as-is. Cross-epoch pre-states cost an epoch transition,
    /// so only a boundary state already dialed past it may short-circuit.
    pub async fn pre_state(
        &self,
        block: &BlockSummary,
        caller: RegenCaller,
    ) -> Result<Arc<BeaconState>, Error> {
        self.count_call(caller, RegenEntrypoint::PreState);

        let parent = self
            .fork_choice
            .block(block.parent_root)
            .ok_or(Error::BlockNotInForkChoice {
                root: block.parent_root,
            })?;

        let parent_epoch = misc::compute_epoch_at_slot::<P>(parent.slot);
        let block_epoch = misc::compute_epoch_at_slot::<P>(block.slot);

        if parent_epoch < block_epoch {
            if let Some(state) = self
                .checkpoint_state_cache
                .latest(parent.block_root, block_epoch)
            {
                return Ok(state);
            }
        } else if let Some(state) = self.state_cache.get(parent.state_root) {
            return Ok(state);
        }

        let (reply, receiver) = oneshot::channel();

        self.queue.submit(RegenMessage::PreState {
            block: *block,
            caller,
            reply,
        })?;

        await_reply(receiver).await
    }

    pub async fn checkpoint_state(
        &self,
        checkpoint: Checkpoint,
        caller: RegenCaller,
    ) -> Result<Arc<BeaconState>, Error> {
        self.count_call(caller, RegenEntrypoint::CheckpointState);

        if let Some(state) = self.checkpoint_state_cache.get(checkpoint) {
            return Ok(state);
        }

        let (reply, receiver) = oneshot::channel();

        self.queue.submit(RegenMessage::CheckpointState {
            checkpoint,
            caller,
            reply,
        })?;

        await_reply(receiver).await
    }

    /// Returns the state of `block_root` dialed forward to `slot` without any blocks applied.
    /// Always regenerates through the queue; slot-dialed states are rarely reusable.
    pub async fn state_at_slot(
        &self,
        block_root: H256,
        slot: Slot,
        caller: RegenCaller,
    ) -> Result<Arc<BeaconState>, Error> {
        self.count_call(caller, RegenEntrypoint::BlockSlotState);

        let (reply, receiver) = oneshot::channel();

        self.queue.submit(RegenMessage::BlockSlotState {
            block_root,
            slot,
            caller,
            reply,
        })?;

        await_reply(receiver).await
    }

    pub async fn state_by_root(
        &self,
        state_root: H256,
        caller: RegenCaller,
    ) -> Result<Arc<BeaconState>, Error> {
        self.count_call(caller, RegenEntrypoint::State);

        if let Some(state) = self.state_cache.get(state_root) {
            return Ok(state);
        }

        let (reply, receiver) = oneshot::channel();

        self.queue.submit(RegenMessage::State {
            state_root,
            caller,
            reply,
        })?;

        await_reply(receiver).await
    }

    /// Proposer indices for a block proposed at `block_slot` on top of `parent_block`, served
    /// without state reconstruction.
    pub fn proposer_shuffling(
        &self,
        parent_block: &BlockSummary,
        block_slot: Slot,
    ) -> Result<Arc<[ValidatorIndex]>, Error> {
        let epoch = misc::compute_epoch_at_slot::<P>(block_slot);
        let dependent_root =
            dependent_root_at_epoch::<P, _>(self.fork_choice.as_ref(), parent_block, epoch)?;

        if let Some(proposers) = self.head_tracker.proposers(epoch, dependent_root) {
            return Ok(proposers);
        }

        if let Some(proposers) = self.shuffling_cache.proposers(epoch, dependent_root) {
            return Ok(proposers);
        }

        let state = self.read_checkpoint_state(epoch, dependent_root)?;

        Ok(state.proposers.clone())
    }

    /// Attester shuffling for the epoch of `target`, served without state reconstruction.
    pub fn attester_shuffling(&self, target: Checkpoint) -> Result<Arc<[ValidatorIndex]>, Error> {
        let epoch = target.epoch;
        let decision_epoch = epoch.saturating_sub(1);

        let target_block =
            self.fork_choice
                .block(target.root)
                .ok_or(Error::BlockNotInForkChoice { root: target.root })?;

        let dependent_root =
            dependent_root_at_epoch::<P, _>(self.fork_choice.as_ref(), &target_block, decision_epoch)?;

        if let Some(shuffling) = self.head_tracker.attester_shuffling(epoch, dependent_root) {
            return Ok(shuffling);
        }

        if let Some(shuffling) =
            self.shuffling_cache
                .attester_shuffling(epoch, decision_epoch, dependent_root)
        {
            return Ok(shuffling);
        }

        let state = self.read_checkpoint_state(decision_epoch, dependent_root)?;

        [
            RelativeEpoch::Next,
            RelativeEpoch::Current,
            RelativeEpoch::Previous,
        ]
        .into_iter()
        .map(|relative_epoch| state.shuffling(relative_epoch))
        .find(|shuffling| shuffling.epoch == epoch)
        .map(|shuffling| shuffling.shuffling.clone())
        .ok_or_else(|| {
            Error::Persistent(anyhow!(
                "checkpoint state at epoch {decision_epoch} does not cover epoch {epoch}",
            ))
        })
    }

    /// Registers `state` in the dependent root index. Does not promote it into the state cache;
    /// regeneration does that for the states it produces.
    pub fn add_post_state(&self, state: &Arc<BeaconState>, block: &BlockSummary) {
        register_post_state::<P, _>(
            &self.shuffling_cache,
            self.fork_choice.as_ref(),
            state,
            block,
        );

        self.prune_on_finality();
    }

    /// Replaces the head summary. The head state is taken from `candidate_state` when it matches
    /// the block, from the caches otherwise; failing both, it is regenerated in the background
    /// and the head is observably unavailable until that completes.
    pub fn set_head(&self, block: &BlockSummary, candidate_state: Option<Arc<BeaconState>>) {
        let epoch = misc::compute_epoch_at_slot::<P>(block.slot);

        let summary = HeadSummary {
            block_root: block.block_root,
            state_root: block.state_root,
            slot: block.slot,
            epoch,
            target_root: block.target_root,
            dependent_root_next: self.head_dependent_root(block, epoch),
            dependent_root_current: self.head_dependent_root(block, epoch.saturating_sub(1)),
            dependent_root_previous: self.head_dependent_root(block, epoch.saturating_sub(2)),
        };

        let matches_head = |state: &Arc<BeaconState>| {
            state.slot == block.slot && state.state_root == block.state_root
        };

        let state = candidate_state
            .filter(matches_head)
            .or_else(|| {
                self.checkpoint_state_cache
                    .latest(block.block_root, Epoch::MAX)
                    .filter(matches_head)
            })
            .or_else(|| self.state_cache.get(block.state_root));

        let missing = state.is_none();

        self.head_tracker.set(summary, state);

        if missing {
            let message = RegenMessage::HeadState {
                state_root: block.state_root,
            };

            if let Err(error) = self.queue.submit(message) {
                warn!("unable to schedule head state regeneration: {error}");
            }
        }

        self.prune_on_finality();
    }

    #[must_use]
    pub fn head(&self) -> Option<HeadSummary> {
        self.head_tracker.summary()
    }

    #[must_use]
    pub fn head_state(&self) -> Option<Arc<BeaconState>> {
        let (summary, state) = self.head_tracker.summary_and_state()?;

        state.or_else(|| self.state_cache.get(summary.state_root))
    }

    /// Head state dialed forward to the nearest checkpoint at or before `slot`. Targets at or
    /// before the head are answered with the head state itself.
    pub fn head_state_at_slot(&self, slot: Slot) -> Result<Arc<BeaconState>, Error> {
        let (summary, state) = self
            .head_tracker
            .summary_and_state()
            .ok_or(Error::HeadUnavailable)?;

        let state = state.ok_or(Error::HeadUnavailable)?;

        if slot <= summary.slot {
            return Ok(state);
        }

        self.transition
            .process_slots_to_nearest_checkpoint(state, slot)
            .map_err(Error::Transition)
    }

    pub fn head_state_at_epoch(&self, epoch: Epoch) -> Result<Arc<BeaconState>, Error> {
        self.head_state_at_slot(misc::compute_start_slot_at_epoch::<P>(epoch))
    }

    /// Rejects every pending and in-flight job with [`Error::Cancelled`] and refuses new
    /// submissions. Called at shutdown.
    pub fn cancel(&self) {
        self.queue.stop();
    }

    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn state_cache(&self) -> &StateCache {
        &self.state_cache
    }

    #[must_use]
    pub fn checkpoint_state_cache(&self) -> &CheckpointStateCache {
        &self.checkpoint_state_cache
    }

    fn read_checkpoint_state(
        &self,
        epoch: Epoch,
        dependent_root: H256,
    ) -> Result<Arc<BeaconState>, Error> {
        let state = self
            .state_reader
            .checkpoint_state(epoch, dependent_root)
            .map_err(Error::Persistent)?
            .ok_or_else(|| {
                Error::Persistent(anyhow!(
                    "checkpoint state at epoch {epoch} with dependent root {dependent_root:?} \
                     is not in the persistent store",
                ))
            })?;

        // Spare the store the next miss.
        let checkpoint = Checkpoint {
            epoch,
            root: dependent_root,
        };

        self.checkpoint_state_cache.insert(checkpoint, state.clone());

        Ok(state)
    }

    fn head_dependent_root(&self, block: &BlockSummary, epoch: Epoch) -> H256 {
        match dependent_root_at_epoch::<P, _>(self.fork_choice.as_ref(), block, epoch) {
            Ok(dependent_root) => dependent_root,
            Err(error) => {
                debug!("unable to resolve head dependent root at epoch {epoch}: {error}");
                H256::zero()
            }
        }
    }

    fn prune_on_finality(&self) {
        let finalized_epoch = self.fork_choice.finalized_checkpoint().epoch;
        let previous = self
            .last_finalized_epoch
            .swap(finalized_epoch, Ordering::AcqRel);

        if finalized_epoch > previous {
            self.shuffling_cache.prune(finalized_epoch);

            if finalized_epoch > GENESIS_EPOCH {
                self.checkpoint_state_cache.prune(finalized_epoch - 1);
            }
        }
    }

    fn count_call(&self, caller: RegenCaller, entrypoint: RegenEntrypoint) {
        if let Some(metrics) = self.metrics.as_ref() {
            metrics.count_regen_call(caller.as_str(), entrypoint.as_str());
        }
    }
}

async fn await_reply(receiver: Receiver<Result<Arc<BeaconState>, Error>>) -> Result<Arc<BeaconState>, Error> {
    match receiver.await {
        Ok(result) => result,
        Err(Canceled) => Err(Error::Cancelled),
    }
}

/// A wrapper over [`JoinHandle`] that can be used to wait for the regen worker to finish.
///
/// In normal operation the worker thread should be joined explicitly using
/// [`RegenHandle::join`]. Tests may drop [`RegenHandle`], at which point the worker thread is
/// stopped and joined implicitly.
pub struct RegenHandle {
    join_handle: Option<JoinHandle<Result<()>>>,
    regen_tx: Sender<RegenMessage>,
    cancelled: Arc<AtomicBool>,
}

impl Drop for RegenHandle {
    fn drop(&mut self) {
        // Stop the worker thread to avoid a deadlock if the corresponding `Regenerator` hasn't
        // been dropped yet. A panicking test may have left the worker blocked mid-job, so only
        // join when unwinding is not in progress.
        self.stop();

        if !std::thread::panicking() {
            self.join_internal()
                .expect("regen worker should succeed when joined implicitly")
        }
    }
}

impl RegenHandle {
    pub fn join(mut self) -> Result<()> {
        self.join_internal()
    }

    fn stop(&self) {
        self.cancelled.store(true, Ordering::Release);

        // The worker may already be gone; nothing to clean up if so.
        let _ = self.regen_tx.send(RegenMessage::Stop);
    }

    fn join_internal(&mut self) -> Result<()> {
        // Don't use `Option::expect` here.
        // `RegenHandle::join_internal` is called twice in normal operation.
        match self.join_handle.take() {
            Some(join_handle) => join_handle
                .join()
                .map_err(|_| anyhow!("regen worker panicked"))?,
            None => Ok(()),
        }
    }
}
