use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use anyhow::{ensure, Result};
use helper_functions::misc;
use parking_lot::{Condvar, Mutex};
use types::{
    containers::Checkpoint,
    preset::Mainnet,
    primitives::{Epoch, Slot, ValidatorIndex, H256},
    state::{BeaconState, EpochShuffling},
};

use crate::{
    controller::{RegenHandle, Regenerator},
    interfaces::{BlockSummary, ForkChoice, StateReader, StateTransition},
    misc::RegenConfig,
};

pub type TestRegenerator = Regenerator<Mainnet, TestForkChoice, TestTransition, TestReader>;

pub struct Context {
    regenerator: Arc<TestRegenerator>,
    #[expect(
        dead_code,
        reason = "Keep the `RegenHandle` around so the worker thread is joined when the test ends."
    )]
    handle: RegenHandle,
    pub fork_choice: Arc<TestForkChoice>,
    pub transition: Arc<TestTransition>,
    pub reader: Arc<TestReader>,
}

impl Context {
    pub fn new(fork_choice: TestForkChoice) -> Self {
        Self::with_collaborators(fork_choice, TestTransition::default(), TestReader::default())
    }

    pub fn with_collaborators(
        fork_choice: TestForkChoice,
        transition: TestTransition,
        reader: TestReader,
    ) -> Self {
        let fork_choice = Arc::new(fork_choice);
        let transition = Arc::new(transition);
        let reader = Arc::new(reader);

        let (regenerator, handle) = Regenerator::new(
            RegenConfig::default(),
            fork_choice.clone(),
            transition.clone(),
            reader.clone(),
            None,
        )
        .expect("spawning the regen worker should succeed");

        Self {
            regenerator,
            handle,
            fork_choice,
            transition,
            reader,
        }
    }

    pub fn regenerator(&self) -> &Arc<TestRegenerator> {
        &self.regenerator
    }
}

#[derive(Default)]
pub struct TestForkChoice {
    blocks: HashMap<H256, BlockSummary>,
    finalized: Mutex<Checkpoint>,
}

impl TestForkChoice {
    pub fn add_block(&mut self, block: BlockSummary) {
        self.blocks.insert(block.block_root, block);
    }

    pub fn set_finalized(&self, checkpoint: Checkpoint) {
        *self.finalized.lock() = checkpoint;
    }
}

impl ForkChoice for TestForkChoice {
    fn block(&self, block_root: H256) -> Option<BlockSummary> {
        self.blocks.get(&block_root).copied()
    }

    fn block_by_state_root(&self, state_root: H256) -> Option<BlockSummary> {
        self.blocks
            .values()
            .find(|block| block.state_root == state_root)
            .copied()
    }

    fn finalized_checkpoint(&self) -> Checkpoint {
        *self.finalized.lock()
    }
}

#[derive(Default)]
struct GateState {
    open: bool,
    entries: usize,
}

/// Blocks transition calls until opened. Lets tests hold the regen worker inside a job while
/// they submit more work, and records how many calls ever overlapped.
#[derive(Default)]
pub struct Gate {
    state: Mutex<GateState>,
    condvar: Condvar,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
}

impl Gate {
    pub fn new_closed() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn new_open() -> Arc<Self> {
        let gate = Self::default();
        gate.state.lock().open = true;
        Arc::new(gate)
    }

    pub fn open(&self) {
        self.state.lock().open = true;
        self.condvar.notify_all();
    }

    /// Waits until at least `entries` transition calls have reached the gate.
    pub fn wait_for_entries(&self, entries: usize) {
        let mut guard = self.state.lock();

        while guard.entries < entries {
            self.condvar.wait(&mut guard);
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrent.load(Ordering::Acquire)
    }

    fn pass(&self) {
        let concurrent = self.concurrent.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_concurrent.fetch_max(concurrent, Ordering::AcqRel);

        let mut guard = self.state.lock();
        guard.entries += 1;
        self.condvar.notify_all();

        while !guard.open {
            self.condvar.wait(&mut guard);
        }

        drop(guard);

        self.concurrent.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Deterministic stand-in for the state transition function.
///
/// Slot dialing rotates shufflings at every epoch boundary and derives the new state root from
/// the old one, so identical inputs always produce identical states. Block replay stamps the
/// block's declared state root onto the post-state, which keeps regenerated states consistent
/// with the summaries in [`TestForkChoice`].
#[derive(Default)]
pub struct TestTransition {
    gate: Option<Arc<Gate>>,
    processed_slots: Mutex<Vec<Slot>>,
    processed_blocks: Mutex<Vec<H256>>,
}

impl TestTransition {
    pub fn gated(gate: Arc<Gate>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn processed_slots(&self) -> Vec<Slot> {
        self.processed_slots.lock().clone()
    }

    pub fn processed_blocks(&self) -> Vec<H256> {
        self.processed_blocks.lock().clone()
    }

    fn pass_gate(&self) {
        if let Some(gate) = self.gate.as_ref() {
            gate.pass();
        }
    }
}

impl StateTransition for TestTransition {
    fn process_slots(&self, state: Arc<BeaconState>, slot: Slot) -> Result<Arc<BeaconState>> {
        self.pass_gate();
        self.processed_slots.lock().push(slot);

        ensure!(
            state.slot <= slot,
            "cannot process slots backwards: {} > {slot}",
            state.slot,
        );

        if state.slot == slot {
            return Ok(state);
        }

        let mut next = (*state).clone();
        let from_epoch = misc::compute_epoch_at_slot::<Mainnet>(state.slot);
        let to_epoch = misc::compute_epoch_at_slot::<Mainnet>(slot);

        for epoch in from_epoch + 1..=to_epoch {
            rotate_shufflings(&mut next, epoch);
        }

        next.slot = slot;
        next.state_root = state_root_after_slots(state.state_root, slot);

        Ok(Arc::new(next))
    }

    fn process_slots_to_nearest_checkpoint(
        &self,
        state: Arc<BeaconState>,
        slot: Slot,
    ) -> Result<Arc<BeaconState>> {
        let boundary_slot =
            misc::compute_start_slot_at_epoch::<Mainnet>(misc::compute_epoch_at_slot::<Mainnet>(slot));

        if boundary_slot <= state.slot {
            return Ok(state);
        }

        self.process_slots(state, boundary_slot)
    }

    fn process_block(
        &self,
        pre_state: Arc<BeaconState>,
        block: &BlockSummary,
    ) -> Result<Arc<BeaconState>> {
        self.pass_gate();
        self.processed_blocks.lock().push(block.block_root);

        ensure!(
            pre_state.slot == block.slot,
            "pre-state slot {} does not match block slot {}",
            pre_state.slot,
            block.slot,
        );

        let mut post_state = (*pre_state).clone();
        post_state.state_root = block.state_root;

        Ok(Arc::new(post_state))
    }
}

#[derive(Default)]
pub struct TestReader {
    states: Mutex<HashMap<(Epoch, H256), Arc<BeaconState>>>,
    reads: AtomicUsize,
}

impl TestReader {
    pub fn add_state(&self, epoch: Epoch, dependent_root: H256, state: Arc<BeaconState>) {
        self.states.lock().insert((epoch, dependent_root), state);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Acquire)
    }
}

impl StateReader for TestReader {
    fn checkpoint_state(
        &self,
        epoch: Epoch,
        dependent_root: H256,
    ) -> Result<Option<Arc<BeaconState>>> {
        self.reads.fetch_add(1, Ordering::AcqRel);

        Ok(self.states.lock().get(&(epoch, dependent_root)).cloned())
    }
}

pub fn block(root_byte: u8, parent_root: H256, slot: Slot, target_root: H256) -> BlockSummary {
    let block_root = H256::repeat_byte(root_byte);

    BlockSummary {
        block_root,
        parent_root,
        state_root: state_root_for_block(block_root),
        slot,
        target_root,
    }
}

pub fn state_root_for_block(block_root: H256) -> H256 {
    H256::from_low_u64_be(block_root.to_low_u64_be() ^ 0xABCD_0000_0000)
}

pub fn state_root_after_slots(state_root: H256, slot: Slot) -> H256 {
    H256::from_low_u64_be(
        state_root
            .to_low_u64_be()
            .wrapping_mul(1_000_003)
            .wrapping_add(slot),
    )
}

pub fn shuffling_for_epoch(epoch: Epoch) -> EpochShuffling {
    EpochShuffling {
        epoch,
        shuffling: (0..4).map(|index| epoch * 10 + index).collect(),
    }
}

pub fn proposers_for_epoch(epoch: Epoch) -> Arc<[ValidatorIndex]> {
    (0..32).map(|offset| epoch * 100 + offset).collect()
}

/// A state summary as it would look right after `slot` was processed.
pub fn state_at_slot(slot: Slot) -> Arc<BeaconState> {
    let epoch = misc::compute_epoch_at_slot::<Mainnet>(slot);

    Arc::new(BeaconState {
        slot,
        state_root: H256::from_low_u64_be(0x5000_0000_0000 | slot),
        proposers: proposers_for_epoch(epoch),
        previous_shuffling: shuffling_for_epoch(epoch.saturating_sub(1)),
        current_shuffling: shuffling_for_epoch(epoch),
        next_shuffling: shuffling_for_epoch(epoch + 1),
    })
}

/// The post-state matching `block`.
pub fn state_for_block(block: &BlockSummary) -> Arc<BeaconState> {
    let mut state = (*state_at_slot(block.slot)).clone();
    state.state_root = block.state_root;

    Arc::new(state)
}

fn rotate_shufflings(state: &mut BeaconState, epoch: Epoch) {
    state.previous_shuffling = state.current_shuffling.clone();
    state.current_shuffling = state.next_shuffling.clone();
    state.next_shuffling = shuffling_for_epoch(epoch + 1);
    state.proposers = proposers_for_epoch(epoch);
}

pub fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);

    while !condition() {
        assert!(
            Instant::now() < deadline,
            "condition was not met within 5 seconds",
        );

        std::thread::sleep(Duration::from_millis(1));
    }
}
