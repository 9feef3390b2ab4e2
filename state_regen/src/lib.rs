//! Regeneration of beacon chain states with layered caching.
//!
//! This crate handles the following concerns:
//! - Serializing expensive regeneration work through a bounded queue ([`Regenerator`]).
//! - Resolving shuffling decision roots over the fork choice DAG ([`dependent_root_at_epoch`]).
//! - Indexing live states by decision root so shuffling queries skip regeneration
//!   ([`ShufflingCache`]).
//! - Tracking the head and degrading gracefully while its state is regenerated
//!   ([`HeadTracker`]).
//!
//! States by root and by checkpoint are cached in the [`state_cache`] crate. The fork choice
//! DAG, the state transition function, and the persistent store are consumed through the
//! [`ForkChoice`], [`StateTransition`], and [`StateReader`] traits and are substitutable in
//! tests.

pub use crate::{
    controller::{RegenHandle, Regenerator},
    dependent_root::dependent_root_at_epoch,
    error::Error,
    head_tracker::{HeadSummary, HeadTracker},
    interfaces::{BlockSummary, ForkChoice, StateReader, StateTransition},
    misc::{RegenCaller, RegenConfig, RegenEntrypoint},
    queue::MAX_REGEN_QUEUE_LENGTH,
    shuffling_cache::{ShufflingCache, DEFAULT_EPOCHS_RETAINED_AFTER_FINALITY},
};

mod controller;
mod dependent_root;
mod error;
mod head_tracker;
mod interfaces;
mod messages;
mod misc;
mod queue;
mod shuffling_cache;
mod worker;

#[cfg(test)]
mod helpers;
