// `Worker::run` executes on a dedicated thread and performs all regeneration sequentially as an
// alternative to locking states during multi-step transitions. Facade fast paths only perform
// local cache reads; everything that calls into the transition function goes through here, one
// job at a time.

use core::marker::PhantomData;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    mpsc::Receiver,
    Arc,
};

use anyhow::{anyhow, Result};
use helper_functions::misc;
use log::debug;
use prometheus_metrics::Metrics;
use state_cache::{CheckpointStateCache, StateCache};
use types::{
    containers::Checkpoint,
    preset::Preset,
    primitives::{Slot, H256},
    state::BeaconState,
};

use crate::{
    dependent_root::dependent_root_at_epoch,
    error::Error,
    head_tracker::HeadTracker,
    interfaces::{BlockSummary, ForkChoice, StateReader, StateTransition},
    messages::{send_reply, RegenMessage},
    misc::{RegenCaller, RegenEntrypoint},
    shuffling_cache::{register_post_state, ShufflingCache},
};

pub struct Worker<P, F, T, R> {
    fork_choice: Arc<F>,
    transition: Arc<T>,
    state_reader: Arc<R>,
    state_cache: Arc<StateCache>,
    checkpoint_state_cache: Arc<CheckpointStateCache>,
    shuffling_cache: Arc<ShufflingCache>,
    head_tracker: Arc<HeadTracker>,
    regen_rx: Receiver<RegenMessage>,
    queue_length: Arc<AtomicUsize>,
    cancelled: Arc<AtomicBool>,
    metrics: Option<Arc<Metrics>>,
    phantom: PhantomData<P>,
}

impl<P, F, T, R> Worker<P, F, T, R>
where
    P: Preset,
    F: ForkChoice,
    T: StateTransition,
    R: StateReader,
{
    #[expect(clippy::too_many_arguments)]
    pub(crate) fn new(
        fork_choice: Arc<F>,
        transition: Arc<T>,
        state_reader: Arc<R>,
        state_cache: Arc<StateCache>,
        checkpoint_state_cache: Arc<CheckpointStateCache>,
        shuffling_cache: Arc<ShufflingCache>,
        head_tracker: Arc<HeadTracker>,
        regen_rx: Receiver<RegenMessage>,
        queue_length: Arc<AtomicUsize>,
        cancelled: Arc<AtomicBool>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            fork_choice,
            transition,
            state_reader,
            state_cache,
            checkpoint_state_cache,
            shuffling_cache,
            head_tracker,
            regen_rx,
            queue_length,
            cancelled,
            metrics,
            phantom: PhantomData,
        }
    }

    pub fn run(self) -> Result<()> {
        while let Ok(message) = self.regen_rx.recv() {
            match message {
                RegenMessage::Stop => break,
                message => self.handle_message(message),
            }
        }

        self.drain();

        Ok(())
    }

    fn handle_message(&self, message: RegenMessage) {
        let Some((caller, entrypoint)) = message.labels() else {
            return;
        };

        if self.cancelled.load(Ordering::Acquire) {
            message.reject(Error::Cancelled);
            self.finish_job();
            return;
        }

        let timer = self.metrics.as_ref().and_then(|metrics| {
            prometheus_metrics::start_timer_vec(
                &metrics.regen_fn_call_duration,
                &[caller.as_str(), entrypoint.as_str()],
            )
        });

        match message {
            RegenMessage::PreState { block, reply, .. } => {
                let result = self.job_result(caller, entrypoint, self.pre_state(&block));
                send_reply(reply, result);
            }
            RegenMessage::CheckpointState {
                checkpoint, reply, ..
            } => {
                let result = self.job_result(caller, entrypoint, self.checkpoint_state(checkpoint));
                send_reply(reply, result);
            }
            RegenMessage::BlockSlotState {
                block_root,
                slot,
                reply,
                ..
            } => {
                let result =
                    self.job_result(caller, entrypoint, self.state_at_slot(block_root, slot));
                send_reply(reply, result);
            }
            RegenMessage::State {
                state_root, reply, ..
            } => {
                let result = self.job_result(caller, entrypoint, self.state_by_root(state_root));
                send_reply(reply, result);
            }
            RegenMessage::HeadState { state_root } => {
                match self.job_result(caller, entrypoint, self.state_by_root(state_root)) {
                    Ok(state) => {
                        if !self.head_tracker.try_install_state(state_root, &state) {
                            debug!(
                                "head moved away from state {state_root:?} before it was \
                                 regenerated",
                            );
                        }
                    }
                    Err(error) => debug!("head state regeneration failed: {error}"),
                }
            }
            RegenMessage::Stop => {}
        }

        prometheus_metrics::stop_and_record(timer);
        self.finish_job();
    }

    /// Rejects every remaining job. Called once the `Stop` message or the cancellation flag ends
    /// the message loop.
    fn drain(&self) {
        while let Ok(message) = self.regen_rx.try_recv() {
            if matches!(message, RegenMessage::Stop) {
                continue;
            }

            message.reject(Error::Cancelled);
            self.finish_job();
        }
    }

    fn job_result(
        &self,
        caller: RegenCaller,
        entrypoint: RegenEntrypoint,
        result: Result<Arc<BeaconState>, Error>,
    ) -> Result<Arc<BeaconState>, Error> {
        let result = if self.cancelled.load(Ordering::Acquire) {
            Err(Error::Cancelled)
        } else {
            result
        };

        if result.is_err() {
            if let Some(metrics) = self.metrics.as_ref() {
                metrics.count_regen_error(caller.as_str(), entrypoint.as_str());
            }
        }

        result
    }

    fn finish_job(&self) {
        let length = self.queue_length.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);

        if let Some(metrics) = self.metrics.as_ref() {
            metrics.set_regen_queue_length(length);
            metrics.set_state_cache_size(self.state_cache.len());
            metrics.set_checkpoint_state_cache_size(self.checkpoint_state_cache.len());
        }
    }

    fn pre_state(&self, block: &BlockSummary) -> Result<Arc<BeaconState>, Error> {
        let parent = self.block(block.parent_root)?;
        let state = self.state_for_block(&parent)?;

        self.advance(state, parent.block_root, block.slot)
    }

    fn checkpoint_state(&self, checkpoint: Checkpoint) -> Result<Arc<BeaconState>, Error> {
        if let Some(state) = self.checkpoint_state_cache.get(checkpoint) {
            return Ok(state);
        }

        let block = self.block(checkpoint.root)?;
        let state = self.state_for_block(&block)?;
        let target_slot = misc::compute_start_slot_at_epoch::<P>(checkpoint.epoch);

        let state = if state.slot < target_slot {
            self.advance(state, checkpoint.root, target_slot)?
        } else {
            state
        };

        self.checkpoint_state_cache.insert(checkpoint, state.clone());

        Ok(state)
    }

    fn state_at_slot(&self, block_root: H256, slot: Slot) -> Result<Arc<BeaconState>, Error> {
        let block = self.block(block_root)?;

        if slot < block.slot {
            return Err(Error::Unresolvable { block_root, slot });
        }

        let state = self.state_for_block(&block)?;

        self.advance(state, block.block_root, slot)
    }

    fn state_by_root(&self, state_root: H256) -> Result<Arc<BeaconState>, Error> {
        if let Some(state) = self.state_cache.get(state_root) {
            return Ok(state);
        }

        let block = self
            .fork_choice
            .block_by_state_root(state_root)
            .ok_or(Error::BlockNotInForkChoice { root: state_root })?;

        self.state_for_block(&block)
    }

    /// Returns the post-state of `block`, replaying ancestor blocks forward from the nearest
    /// state the caches still hold.
    fn state_for_block(&self, block: &BlockSummary) -> Result<Arc<BeaconState>, Error> {
        if let Some(state) = self.state_cache.get(block.state_root) {
            return Ok(state);
        }

        let mut blocks_to_replay = vec![*block];
        let mut base = None;

        loop {
            let earliest = blocks_to_replay[blocks_to_replay.len() - 1];

            let Some(parent) = self.fork_choice.block(earliest.parent_root) else {
                // The walk fell off the pruned end of the DAG. Restore from the persistent
                // store below.
                break;
            };

            if let Some(state) = self.state_cache.get(parent.state_root) {
                base = Some(state);
                break;
            }

            let max_epoch = misc::compute_epoch_at_slot::<P>(earliest.slot);

            if let Some(state) = self
                .checkpoint_state_cache
                .latest(parent.block_root, max_epoch)
            {
                base = Some(state);
                break;
            }

            blocks_to_replay.push(parent);
        }

        let mut state = match base {
            Some(state) => state,
            None => self.finalized_base_state(block)?,
        };

        for replay_block in blocks_to_replay.iter().rev() {
            if state.slot < replay_block.slot {
                state = self.advance(state, replay_block.parent_root, replay_block.slot)?;
            }

            state = self
                .transition
                .process_block(state, replay_block)
                .map_err(Error::Transition)?;

            self.state_cache.insert(state.clone());
            register_post_state::<P, _>(
                &self.shuffling_cache,
                self.fork_choice.as_ref(),
                &state,
                replay_block,
            );
        }

        Ok(state)
    }

    /// Restores the checkpoint state at the finalized epoch from the persistent store.
    fn finalized_base_state(&self, block: &BlockSummary) -> Result<Arc<BeaconState>, Error> {
        let finalized = self.fork_choice.finalized_checkpoint();
        let dependent_root =
            dependent_root_at_epoch::<P, _>(self.fork_choice.as_ref(), block, finalized.epoch)?;

        self.state_reader
            .checkpoint_state(finalized.epoch, dependent_root)
            .map_err(Error::Persistent)?
            .ok_or_else(|| {
                Error::Persistent(anyhow!(
                    "checkpoint state at epoch {} with dependent root {dependent_root:?} \
                     is not in the persistent store",
                    finalized.epoch,
                ))
            })
    }

    /// Advances `state` to `slot`, publishing every epoch boundary state it crosses to the
    /// checkpoint state cache under `base_block_root`.
    fn advance(
        &self,
        mut state: Arc<BeaconState>,
        base_block_root: H256,
        slot: Slot,
    ) -> Result<Arc<BeaconState>, Error> {
        let mut epoch = misc::compute_epoch_at_slot::<P>(state.slot);
        let target_epoch = misc::compute_epoch_at_slot::<P>(slot);

        while epoch < target_epoch {
            epoch += 1;

            let boundary_slot = misc::compute_start_slot_at_epoch::<P>(epoch);

            state = self
                .transition
                .process_slots(state, boundary_slot)
                .map_err(Error::Transition)?;

            let checkpoint = Checkpoint {
                epoch,
                root: base_block_root,
            };

            self.checkpoint_state_cache.insert(checkpoint, state.clone());
            self.state_cache.insert(state.clone());
        }

        if state.slot < slot {
            state = self
                .transition
                .process_slots(state, slot)
                .map_err(Error::Transition)?;

            self.state_cache.insert(state.clone());
        }

        Ok(state)
    }

    fn block(&self, block_root: H256) -> Result<BlockSummary, Error> {
        self.fork_choice
            .block(block_root)
            .ok_or(Error::BlockNotInForkChoice { root: block_root })
    }
}
