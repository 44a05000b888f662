/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of types specific to the [vote aggregator](super::implementation::VoteAggregator).

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    committee::Committee,
    crypto_primitives::SignatureVerifier,
    data_types::{
        CryptoHash, ParticipantId, SignatureSet, ThresholdFraction, TotalPower, ViewNumber,
    },
};

use super::{implementation::AggregatorError, messages::Vote, validator::ValidationError};

/// Proof that participants holding more than the threshold fraction of a committee's stake voted for
/// `block` in `view`.
///
/// `signatures` is index-aligned with the committee of `view`: the positions that hold a signature are
/// exactly the contributing signers.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize, PartialEq, Eq)]
pub struct QuorumCertificate {
    pub view: ViewNumber,
    pub block: CryptoHash,
    pub signatures: SignatureSet,
}

impl QuorumCertificate {
    /// Checks if all of the signatures in the certificate are correct, and if the set of signatures
    /// carries at least the threshold stake of `committee`.
    ///
    /// A special case is if the qc is the genesis qc, in which case it is automatically correct.
    pub fn is_correct<V: SignatureVerifier + ?Sized>(
        &self,
        committee: &Committee,
        threshold_fraction: ThresholdFraction,
        verifier: &V,
    ) -> bool {
        if self.is_genesis_qc() {
            return true;
        }

        // Check whether the size of the signature set is the same as the size of the committee.
        if self.signatures.len() != committee.len() {
            return false;
        }

        // Check whether every signature is correct and tally up their stakes.
        let message = Vote::signing_bytes(self.view, self.block);
        let mut total_power = TotalPower::new(0);
        for (signature, identity) in self.signatures.iter().zip(committee.iter()) {
            if let Some(signature) = signature {
                if verifier.verify(&message, signature, identity) {
                    total_power += identity.stake;
                } else {
                    // qc contains incorrect signature.
                    return false;
                }
            }
        }

        total_power >= committee.threshold(threshold_fraction)
    }

    pub const fn genesis_qc() -> QuorumCertificate {
        QuorumCertificate {
            view: ViewNumber::init(),
            block: CryptoHash::new([0u8; 32]),
            signatures: SignatureSet::empty(),
        }
    }

    pub fn is_genesis_qc(&self) -> bool {
        *self == Self::genesis_qc()
    }

    /// Get the ids of the participants that contributed a signature to this certificate.
    pub fn signers(&self, committee: &Committee) -> Vec<ParticipantId> {
        self.signatures
            .iter()
            .zip(committee.iter())
            .filter(|(signature, _)| signature.is_some())
            .map(|(_, identity)| identity.id)
            .collect()
    }
}

/// Outcome of an attempt to build a quorum certificate for a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QcStatus {
    /// A certificate exists for the block. Every attempt for the same block returns the same `Arc`.
    Built(Arc<QuorumCertificate>),

    /// Not enough stake has been accumulated for the block yet.
    InsufficientStake {
        accumulated: TotalPower,
        threshold: TotalPower,
    },
}

impl QcStatus {
    pub fn qc(&self) -> Option<&Arc<QuorumCertificate>> {
        match self {
            QcStatus::Built(qc) => Some(qc),
            QcStatus::InsufficientStake { .. } => None,
        }
    }
}

/// Outcome of storing a vote whose block may not be known yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingVoteStatus {
    /// The block is not known yet. The vote was parked until it is.
    Stored,

    /// The block became known concurrently, so the vote was counted straight away.
    Incorporated(QcStatus),
}

/// Outcome of replaying the pending votes of a block that just became known.
///
/// Replay never stops at the first bad vote. `status` is the outcome of the build attempt that
/// follows the replay, while every vote that failed validation is reported in `vote_errors`.
#[derive(Debug)]
pub struct ReplayOutcome {
    pub status: Result<QcStatus, AggregatorError>,
    pub vote_errors: Vec<(ParticipantId, ValidationError)>,
}

/// Stake accounting of a block whose contents are known.
#[derive(Debug)]
pub(crate) struct VotingStatus {
    committee: Arc<Committee>,
    threshold: TotalPower,
    accumulated: TotalPower,
    signers: HashSet<ParticipantId>,
    signatures: SignatureSet,
}

impl VotingStatus {
    pub(crate) fn new(committee: Arc<Committee>, threshold_fraction: ThresholdFraction) -> Self {
        Self {
            threshold: committee.threshold(threshold_fraction),
            accumulated: TotalPower::new(0),
            signers: HashSet::new(),
            signatures: SignatureSet::new(committee.len()),
            committee,
        }
    }

    /// Count `vote`'s stake, returning whether it was counted. Votes from a signer that was already
    /// counted, or from outside the committee, are not.
    ///
    /// # Preconditions
    ///
    /// `vote` was validated against `self.committee`.
    pub(crate) fn add(&mut self, vote: &Vote) -> bool {
        let (Some(pos), Some(stake)) = (
            self.committee.position(&vote.signer),
            self.committee.stake(&vote.signer),
        ) else {
            return false;
        };
        if !self.signers.insert(vote.signer) {
            return false;
        }
        self.signatures.set(pos, Some(vote.signature));
        self.accumulated += stake;
        true
    }

    pub(crate) fn has_quorum(&self) -> bool {
        self.accumulated >= self.threshold
    }

    pub(crate) fn accumulated(&self) -> TotalPower {
        self.accumulated
    }

    pub(crate) fn threshold(&self) -> TotalPower {
        self.threshold
    }

    /// Sum the stakes of the positions that hold a signature, independently of `accumulated`.
    pub(crate) fn recount(&self) -> TotalPower {
        let mut total = TotalPower::new(0);
        for (signature, identity) in self.signatures.iter().zip(self.committee.iter()) {
            if signature.is_some() {
                total += identity.stake
            }
        }
        total
    }

    pub(crate) fn signatures(&self) -> &SignatureSet {
        &self.signatures
    }
}

/// Everything the aggregator knows about one block digest.
#[derive(Debug)]
pub(crate) struct DigestEntry {
    /// Set once the block itself is known.
    pub(crate) block_view: Option<ViewNumber>,

    /// Highest view claimed by any vote stored for this digest.
    pub(crate) claimed_view: ViewNumber,

    /// Votes that arrived before the block, keyed by (view, signer).
    pub(crate) pending: HashMap<(ViewNumber, ParticipantId), Vote>,

    /// Present once the block is known.
    pub(crate) status: Option<VotingStatus>,

    /// The certificate, once built. Never replaced.
    pub(crate) qc: Option<Arc<QuorumCertificate>>,

    /// Set when the entry is removed by pruning. Holders of a stale handle must not mutate it.
    pub(crate) pruned: bool,
}

impl DigestEntry {
    pub(crate) fn new(claimed_view: ViewNumber) -> Self {
        Self {
            block_view: None,
            claimed_view,
            pending: HashMap::new(),
            status: None,
            qc: None,
            pruned: false,
        }
    }

    /// The view this entry is associated with for pruning: the block's view once known, otherwise the
    /// highest view any of its votes claims.
    pub(crate) fn view(&self) -> ViewNumber {
        self.block_view.unwrap_or(self.claimed_view)
    }
}
