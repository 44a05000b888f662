/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Validation of votes against committee snapshots.
//!
//! Validation is stateless and never touches the aggregator's locks, so that signature verification,
//! the most expensive step in handling a vote, runs in parallel across callers.

use std::sync::Arc;

use crate::types::{
    block::Block,
    committee::{Committee, CommitteeError, CommitteeProvider, Identity},
    crypto_primitives::SignatureVerifier,
    data_types::{CryptoHash, ParticipantId, ViewNumber},
    signed_messages::{SignedMessage, Vote as _},
};

use super::messages::Vote;

/// Checks that votes come from eligible signers and carry valid signatures.
pub(crate) struct VoteValidator<P: CommitteeProvider, V: SignatureVerifier> {
    committees: Arc<P>,
    verifier: V,
}

impl<P: CommitteeProvider, V: SignatureVerifier> VoteValidator<P, V> {
    pub(crate) fn new(committees: Arc<P>, verifier: V) -> Self {
        Self {
            committees,
            verifier,
        }
    }

    /// Validate a vote for a block that is not known yet.
    ///
    /// Without the block, the best available eligibility information is the committee of the view that
    /// the vote claims. If the claim turns out to be wrong, the vote fails
    /// [`validate_incorporated_vote`](Self::validate_incorporated_vote) once the block arrives.
    pub(crate) fn validate_pending_vote(&self, vote: &Vote) -> Result<Arc<Committee>, ValidationError> {
        let committee = self.committees.committee_at_view(vote.view)?;
        check_signer(vote, &committee, &self.verifier)?;
        Ok(committee)
    }

    /// Validate a vote against the `block` it votes for, returning the committee that the vote's stake
    /// must be counted in.
    pub(crate) fn validate_incorporated_vote(
        &self,
        vote: &Vote,
        block: &Block,
    ) -> Result<Arc<Committee>, ValidationError> {
        if vote.view != block.view {
            return Err(ValidationError::ViewMismatch {
                vote_view: vote.view,
                block_view: block.view,
            });
        }
        if vote.block != block.hash {
            return Err(ValidationError::BlockMismatch {
                vote_block: vote.block,
                block: block.hash,
            });
        }

        let committee = self.committees.committee_at_view(block.view)?;
        check_signer(vote, &committee, &self.verifier)?;
        Ok(committee)
    }

    pub(crate) fn committees(&self) -> &Arc<P> {
        &self.committees
    }
}

/// Check that the signer of `vote` is in `committee` at the position it claims, and that its signature
/// is correct. Returns the signer's identity.
pub(crate) fn check_signer<'a, V: SignatureVerifier + ?Sized>(
    vote: &Vote,
    committee: &'a Committee,
    verifier: &V,
) -> Result<&'a Identity, ValidationError> {
    let signer = vote.signer();
    let position = committee
        .position(&signer)
        .ok_or(ValidationError::IneligibleSigner {
            signer,
            view: vote.view(),
        })?;
    if position != vote.signer_index as usize {
        return Err(ValidationError::SignerIndexMismatch {
            signer,
            claimed: vote.signer_index,
            actual: position,
        });
    }

    // Safety: `position` was just returned by the committee.
    let identity = committee.identity_at(position).ok_or(ValidationError::IneligibleSigner {
        signer,
        view: vote.view(),
    })?;
    if !vote.is_correct(verifier, identity) {
        return Err(ValidationError::InvalidSignature { signer });
    }

    Ok(identity)
}

/// Enumerates the reasons a vote can be rejected. Rejected votes are discarded without affecting any
/// aggregation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The vote claims a different view than the block it votes for.
    ViewMismatch {
        vote_view: ViewNumber,
        block_view: ViewNumber,
    },

    /// The vote was handed in together with a block it does not vote for.
    BlockMismatch {
        vote_block: CryptoHash,
        block: CryptoHash,
    },

    /// The signer is not a member of the committee of the view.
    IneligibleSigner {
        signer: ParticipantId,
        view: ViewNumber,
    },

    /// The signer is a member of the committee, but not at the position the vote claims.
    SignerIndexMismatch {
        signer: ParticipantId,
        claimed: u32,
        actual: usize,
    },

    /// The signature does not verify against the signer's key.
    InvalidSignature { signer: ParticipantId },

    /// No committee could be found for the view the vote is about.
    CommitteeUnavailable(CommitteeError),
}

impl From<CommitteeError> for ValidationError {
    fn from(value: CommitteeError) -> Self {
        ValidationError::CommitteeUnavailable(value)
    }
}
