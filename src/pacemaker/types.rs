/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of types specific to the [Pacemaker](super::implementation::Pacemaker) subprotocol.

use std::sync::Arc;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    committee::Committee,
    crypto_primitives::SignatureVerifier,
    data_types::{SignatureSet, ThresholdFraction, TotalPower, ViewNumber},
    signed_messages::{SignedMessage, Vote},
};

use super::messages::TimeoutVote;

/// Proof that participants holding more than the threshold fraction of the stake of a committee timed
/// out in `view`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TimeoutCertificate {
    pub view: ViewNumber,
    pub signatures: SignatureSet,
}

impl TimeoutCertificate {
    /// Checks if all of the signatures in the certificate are correct, and if the set of signatures
    /// carries at least the threshold stake of `committee`.
    pub fn is_correct<V: SignatureVerifier + ?Sized>(
        &self,
        committee: &Committee,
        threshold_fraction: ThresholdFraction,
        verifier: &V,
    ) -> bool {
        if self.signatures.len() != committee.len() {
            return false;
        }

        let message = TimeoutVote::signing_bytes(self.view);
        let mut total_power = TotalPower::new(0);
        for (signature, identity) in self.signatures.iter().zip(committee.iter()) {
            if let Some(signature) = signature {
                if !verifier.verify(&message, signature, identity) {
                    return false;
                }
                total_power += identity.stake;
            }
        }

        total_power >= committee.threshold(threshold_fraction)
    }
}

/// Helps replicas incrementally form [`TimeoutCertificate`]s by combining timeout votes for the same
/// view by participants in a given [committee](Committee).
pub(crate) struct TimeoutVoteCollector {
    view: ViewNumber,
    committee: Arc<Committee>,
    threshold: TotalPower,
    signature_set_power: TotalPower,
    signature_set: SignatureSet,
}

impl TimeoutVoteCollector {
    pub(crate) fn new(
        view: ViewNumber,
        committee: Arc<Committee>,
        threshold_fraction: ThresholdFraction,
    ) -> Self {
        Self {
            view,
            threshold: committee.threshold(threshold_fraction),
            signature_set_power: TotalPower::new(0),
            signature_set: SignatureSet::new(committee.len()),
            committee,
        }
    }

    pub(crate) fn view(&self) -> ViewNumber {
        self.view
    }

    /// Adds the timeout vote to the signature set if it is for the collector's view, returning a timeout
    /// certificate if adding the vote allows for one to be created.
    ///
    /// If the timeout vote doesn't match the collector's view, or the signer is not part of its
    /// committee, or its signature is incorrect, then this is a no-op. A certificate is returned at most
    /// once.
    pub(crate) fn collect<V: SignatureVerifier + ?Sized>(
        &mut self,
        vote: TimeoutVote,
        verifier: &V,
    ) -> Option<TimeoutCertificate> {
        if self.view != vote.view() {
            return None;
        }

        // Check if the signer is actually in the committee.
        let pos = self.committee.position(&vote.signer())?;
        let identity = self.committee.identity_at(pos)?;

        // If the vote has not been collected before, insert its signature into the signature set.
        if self.signature_set.get(pos).is_some() || !vote.is_correct(verifier, identity) {
            return None;
        }
        let was_quorum = self.signature_set_power >= self.threshold;
        self.signature_set.set(pos, Some(vote.signature));
        self.signature_set_power += identity.stake;

        // If inserting the vote makes the signature set form a quorum, then create a timeout certificate.
        if !was_quorum && self.signature_set_power >= self.threshold {
            return Some(TimeoutCertificate {
                view: self.view,
                signatures: self.signature_set.clone(),
            });
        }

        None
    }
}

/// Where a replica is within its current view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewPhase {
    /// Waiting for the leader's proposal.
    AwaitingProposal,

    /// Voted for the view's proposal.
    Voted,

    /// Timed out, waiting for a quorum or timeout certificate to leave the view.
    AwaitingCertificate,

    /// Left the view. Timers of the view are stale from now on.
    Advanced,
}
