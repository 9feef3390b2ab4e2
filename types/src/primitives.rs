pub use ethereum_types::H256;

pub type Epoch = u64;
pub type Slot = u64;
pub type ValidatorIndex = u64;

pub const GENESIS_EPOCH: Epoch = 0;
pub const GENESIS_SLOT: Slot = 0;
