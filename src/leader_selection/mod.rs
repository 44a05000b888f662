//! Stake-weighted, deterministic leader selection.
//!
//! Every view has exactly one leader, which proposes a block in that view and collects the votes for
//! the block of the view before. Leaders are drawn from the committee of an epoch using a random
//! [`EpochSeed`](crate::types::data_types::EpochSeed) that is fixed at the start of the epoch, so every
//! replica with the same seed and committee computes the same schedule without communicating.
//!
//! The probability that a participant leads any given view is proportional to its stake. Participants
//! without stake never lead. See [`select_leader`](implementation::select_leader) for the exact
//! procedure.

pub mod implementation;
pub use implementation::{
    HorizonPolicy, LeaderSelectionError, LeaderSelector, LeaderSelectorConfiguration,
};
