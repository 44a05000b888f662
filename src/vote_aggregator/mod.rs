//! Subprotocol for aggregating stake-weighted votes into quorum certificates.
//!
//! ## Quorum certificates
//!
//! A [`QuorumCertificate`](types::QuorumCertificate) for a block proves that participants holding
//! strictly more than a [`ThresholdFraction`](crate::types::data_types::ThresholdFraction) of the total
//! stake of the block's committee voted for it. With the default fraction of two-thirds and a committee
//! whose stakes sum up to 100, that is 67 stake or more.
//!
//! Votes are grouped by block digest alone. The view of a block only decides which committee the
//! stake is counted in, and when the block's state may be pruned.
//!
//! ## Out-of-order votes
//!
//! Votes frequently arrive before the block they vote for. The aggregator therefore has two entry
//! points for votes:
//! - [`store_pending_vote`](implementation::VoteAggregator::store_pending_vote) parks a vote for a block
//!   that is not known yet, after checking its signature against the committee of the view it claims.
//! - [`store_vote_and_build_qc`](implementation::VoteAggregator::store_vote_and_build_qc) counts a vote
//!   for a known block and builds the certificate once the threshold is crossed.
//!
//! When a block becomes known, [`build_qc_on_receiving_block`](implementation::VoteAggregator::build_qc_on_receiving_block)
//! replays all parked votes. Every vote is validated again against the block itself, and failures are
//! collected instead of aborting the replay.
//!
//! ## Idempotence
//!
//! At most one certificate is built for a block. Once built, it is cached, and every later build
//! attempt for the block returns the cached certificate. A vote is identified by its view and signer,
//! so duplicated deliveries of the same vote never count twice.
//!
//! ## Pruning
//!
//! Every tracked block is indexed by view. [`prune_by_view`](implementation::VoteAggregator::prune_by_view)
//! uses the index to drop the state of every block associated with a view at or below the given view,
//! and remembers the highest pruned view so that late votes for those views are rejected.

pub mod implementation;
pub use implementation::{
    AggregatorConfiguration, AggregatorError, InvariantViolation, VoteAggregator,
    DEFAULT_PENDING_VOTE_WINDOW,
};

pub mod messages;

pub mod types;

pub mod validator;
