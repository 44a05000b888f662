/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The pluggable application that a replica runs consensus for.
//!
//! The application decides what goes into blocks, judges whether a received block is safe to vote for,
//! and consumes the certificates that end views. Block contents are opaque to the rest of the crate.

use crate::{
    pacemaker::messages::ProgressCertificate,
    types::{block::Block, data_types::{Data, ViewNumber}},
    vote_aggregator::types::QuorumCertificate,
};

/// Methods that a type needs to implement to serve as the application of a replica.
///
/// All methods are called from the algorithm thread, so none of them should block for long: a slow
/// application delays voting and may cause views to time out.
pub trait App: Send {
    /// Called when this replica leads `view` and has to propose a block extending the block certified by
    /// `justify`.
    ///
    /// # Return value
    ///
    /// The [`Data`] to be included in the proposed block.
    fn produce_data(&mut self, view: ViewNumber, justify: &QuorumCertificate) -> Data;

    /// Called when a proposed block for the current view was received, to decide whether this replica
    /// should vote for it.
    ///
    /// This is the safety rule: implementations decide, e.g., based on the block's `justify` and on the
    /// blocks previously voted for, whether voting for `block` could violate safety. The algorithm thread
    /// additionally never votes twice in the same view.
    fn is_safe_to_vote(&mut self, block: &Block) -> bool;

    /// Called whenever a quorum or timeout certificate ends a view.
    fn on_certificate(&mut self, certificate: &ProgressCertificate);
}
