/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Thread-safe implementation of the vote aggregator.
//!
//! Main type: [`VoteAggregator`].

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::types::{
    block::Block,
    committee::{Committee, CommitteeError, CommitteeProvider},
    crypto_primitives::SignatureVerifier,
    data_types::{CryptoHash, ParticipantId, ThresholdFraction, TotalPower, ViewNumber},
};

use super::{
    messages::Vote,
    types::{
        DigestEntry, PendingVoteStatus, QcStatus, QuorumCertificate, ReplayOutcome, VotingStatus,
    },
    validator::{ValidationError, VoteValidator},
};

/// Accumulates stake-weighted votes per block and builds at most one [`QuorumCertificate`] per block.
///
/// # Usage
///
/// All methods take `&self`, so a single `VoteAggregator` can be shared between threads (e.g., in an
/// `Arc`). The caller interacts with it through four methods:
/// 1. [`store_pending_vote`](Self::store_pending_vote): when a vote arrives for a block that the caller
///    does not know yet.
/// 2. [`store_vote_and_build_qc`](Self::store_vote_and_build_qc): when a vote arrives for a known block.
/// 3. [`build_qc_on_receiving_block`](Self::build_qc_on_receiving_block): when a block becomes known.
///    This replays the votes parked by `store_pending_vote`.
/// 4. [`prune_by_view`](Self::prune_by_view): when views become irrelevant, e.g., after a certificate for
///    a later view has been formed.
///
/// # Locking
///
/// The aggregator has one index lock, guarding the map from digests to entries, the secondary index
/// from views to digests, and the pruning watermark. Every digest entry has its own lock. The index
/// lock is only held to look up, insert, or remove entries, and is never acquired while an entry lock
/// is held. Vote validation, including signature verification, happens before any lock is taken.
pub struct VoteAggregator<P: CommitteeProvider, V: SignatureVerifier> {
    config: AggregatorConfiguration,
    validator: VoteValidator<P, V>,
    index: Mutex<AggregatorIndex>,
}

impl<P: CommitteeProvider, V: SignatureVerifier> VoteAggregator<P, V> {
    /// Create an empty `VoteAggregator` that validates votes against the committees of `committees`
    /// using `verifier`.
    pub fn new(config: AggregatorConfiguration, committees: Arc<P>, verifier: V) -> Self {
        Self {
            config,
            validator: VoteValidator::new(committees, verifier),
            index: Mutex::new(AggregatorIndex::new()),
        }
    }

    /// Store a vote for a block whose contents are not known yet.
    ///
    /// The vote is validated against the committee of the view it claims and parked under its block
    /// digest. Its stake is not counted until the block becomes known through
    /// [`build_qc_on_receiving_block`](Self::build_qc_on_receiving_block).
    ///
    /// If the block became known since the caller last checked, the vote is counted straight away and
    /// the outcome of the resulting build attempt is returned as [`PendingVoteStatus::Incorporated`].
    ///
    /// Storing the same vote twice has no further effect.
    pub fn store_pending_vote(&self, vote: Vote) -> Result<PendingVoteStatus, AggregatorError> {
        // 1. Validate the vote before taking any locks.
        self.validator.validate_pending_vote(&vote)?;

        // 2. Find or create the entry for the digest, indexing it under the claimed view.
        let entry = {
            let index = lock(&self.index);
            let limit = index
                .pruned_through
                .map_or(ViewNumber::init(), |pruned| pruned + 1)
                + self.config.pending_vote_window;
            if vote.view > limit {
                return Err(AggregatorError::ViewTooFarAhead {
                    view: vote.view,
                    limit,
                });
            }
            drop(index);
            self.entry_for(vote.block, vote.view)?
        };

        // 3. Park the vote, or count it if the block is known.
        let mut entry = lock(&entry);
        if entry.pruned {
            return Err(AggregatorError::UnknownBlock { block: vote.block });
        }

        match entry.block_view {
            Some(block_view) => {
                // The vote was validated against the committee of its claimed view. That is the
                // committee the block's stake is counted in exactly when the views agree.
                if vote.view != block_view {
                    return Err(ValidationError::ViewMismatch {
                        vote_view: vote.view,
                        block_view,
                    }
                    .into());
                }
                let status = Self::count_vote(&mut entry, &vote)?;
                Ok(PendingVoteStatus::Incorporated(status))
            }
            None => {
                entry.claimed_view = entry.claimed_view.max(vote.view);
                entry.pending.entry((vote.view, vote.signer)).or_insert(vote);
                Ok(PendingVoteStatus::Stored)
            }
        }
    }

    /// Count a vote for a known `block` and try to build a certificate for it.
    ///
    /// Returns [`QcStatus::Built`] with the block's certificate if its stake has crossed the threshold,
    /// now or in an earlier call. A certificate is built once per block: every later call for the same
    /// block returns the same `Arc`, even if more votes were counted in the meantime.
    ///
    /// Returns [`QcStatus::InsufficientStake`] otherwise. Duplicate votes are counted once.
    ///
    /// Votes for `block` stored earlier with [`store_pending_vote`](Self::store_pending_vote) are not
    /// replayed by this method. Callers should call
    /// [`build_qc_on_receiving_block`](Self::build_qc_on_receiving_block) as soon as a block becomes
    /// known.
    pub fn store_vote_and_build_qc(
        &self,
        vote: Vote,
        block: &Block,
    ) -> Result<QcStatus, AggregatorError> {
        // 1. Validate the vote against the committee of the block's view, outside of any locks.
        let committee = self.validator.validate_incorporated_vote(&vote, block)?;

        // 2. Find or create the entry for the block.
        let entry = self.entry_for(block.hash, block.view)?;

        // 3. Count the vote and try to build a certificate.
        let mut entry = lock(&entry);
        if entry.pruned {
            return Err(AggregatorError::UnknownBlock { block: block.hash });
        }
        self.ensure_voting_status(&mut entry, block, committee)?;
        Self::count_vote(&mut entry, &vote)
    }

    /// Handle a block becoming known: replay every vote parked for it, then try to build a certificate.
    ///
    /// Replay is independent of the order in which the parked votes arrived. Votes that fail validation
    /// are dropped and reported in [`ReplayOutcome::vote_errors`]; they do not stop the replay.
    pub fn build_qc_on_receiving_block(&self, block: &Block) -> ReplayOutcome {
        let mut vote_errors = Vec::new();
        let status = self.replay(block, &mut vote_errors);
        ReplayOutcome {
            status,
            vote_errors,
        }
    }

    fn replay(
        &self,
        block: &Block,
        vote_errors: &mut Vec<(ParticipantId, ValidationError)>,
    ) -> Result<QcStatus, AggregatorError> {
        // 1. Look up the committee of the block's view before taking any locks.
        let committee = self
            .validator
            .committees()
            .committee_at_view(block.view)?;

        // 2. Mark the block as known, so that votes arriving from now on are counted directly, and take
        //    the votes that were parked so far.
        let entry = self.entry_for(block.hash, block.view)?;
        let pending: Vec<Vote> = {
            let mut entry = lock(&entry);
            if entry.pruned {
                return Err(AggregatorError::UnknownBlock { block: block.hash });
            }
            self.ensure_voting_status(&mut entry, block, committee)?;
            entry.pending.drain().map(|(_, vote)| vote).collect()
        };

        // 3. Validate the parked votes outside of the entry lock.
        let mut valid_votes = Vec::with_capacity(pending.len());
        for vote in pending {
            match self.validator.validate_incorporated_vote(&vote, block) {
                Ok(_) => valid_votes.push(vote),
                Err(err) => {
                    log::debug!("Dropping pending vote by {:?}: {:?}", vote.signer, err);
                    vote_errors.push((vote.signer, err))
                }
            }
        }

        // 4. Count the valid votes and try to build a certificate.
        let mut entry = lock(&entry);
        if entry.pruned {
            return Err(AggregatorError::UnknownBlock { block: block.hash });
        }
        for vote in &valid_votes {
            if let Some(status) = entry.status.as_mut() {
                status.add(vote);
            }
        }
        Self::try_build_qc(&mut entry, block.hash)
    }

    /// Remove all state for blocks associated with views less than or equal to `view`, returning the
    /// number of block digests removed.
    ///
    /// After pruning, operations for any of the removed views fail with
    /// [`AggregatorError::UnknownBlock`]. Pruning is idempotent, and pruning a lower view than an
    /// earlier call has no effect.
    pub fn prune_by_view(&self, view: ViewNumber) -> usize {
        let mut index = lock(&self.index);

        // Split the view index into the views to prune and the views to keep.
        let retained = match view.int().checked_add(1) {
            Some(next) => index.views.split_off(&ViewNumber::new(next)),
            None => BTreeMap::new(),
        };
        let expired = std::mem::replace(&mut index.views, retained);

        let mut removed = 0;
        for digest in expired.into_values().flatten() {
            let Some(entry) = index.entries.get(&digest).cloned() else {
                continue;
            };
            let mut entry = lock(&entry);
            // An entry may be indexed under several views. It is removed only once the view it is
            // associated with is pruned.
            if entry.view() <= view {
                entry.pruned = true;
                index.entries.remove(&digest);
                removed += 1;
            }
        }

        if index.pruned_through.map_or(true, |pruned| pruned < view) {
            index.pruned_through = Some(view);
        }

        log::debug!(
            "Pruned vote aggregator through view {}, removing {} block digests",
            view,
            removed
        );
        removed
    }

    /// Get the certificate built for `block`, if any.
    pub fn qc(&self, block: &CryptoHash) -> Option<Arc<QuorumCertificate>> {
        let entry = lock(&self.index).entries.get(block).cloned()?;
        let entry = lock(&entry);
        entry.qc.clone()
    }

    /// Get the number of block digests that the aggregator currently holds state for.
    pub fn num_tracked_blocks(&self) -> usize {
        lock(&self.index).entries.len()
    }

    /// Find the entry of `block`, creating it if it does not exist, and index it under `view`.
    fn entry_for(
        &self,
        block: CryptoHash,
        view: ViewNumber,
    ) -> Result<Arc<Mutex<DigestEntry>>, AggregatorError> {
        let mut index = lock(&self.index);
        if index.pruned_through.is_some_and(|pruned| view <= pruned) {
            return Err(AggregatorError::UnknownBlock { block });
        }

        let entry = index
            .entries
            .entry(block)
            .or_insert_with(|| Arc::new(Mutex::new(DigestEntry::new(view))))
            .clone();
        index.views.entry(view).or_default().insert(block);
        Ok(entry)
    }

    /// Create the voting status of `entry` if this is the first time its block is seen.
    fn ensure_voting_status(
        &self,
        entry: &mut DigestEntry,
        block: &Block,
        committee: Arc<Committee>,
    ) -> Result<(), AggregatorError> {
        match entry.block_view {
            Some(block_view) if block_view != block.view => {
                Err(InvariantViolation::ConflictingBlockView {
                    block: block.hash,
                    known_view: block_view,
                    block_view: block.view,
                }
                .into())
            }
            Some(_) => Ok(()),
            None => {
                entry.status = Some(VotingStatus::new(committee, self.config.threshold_fraction));
                entry.block_view = Some(block.view);
                Ok(())
            }
        }
    }

    fn count_vote(entry: &mut DigestEntry, vote: &Vote) -> Result<QcStatus, AggregatorError> {
        if let Some(status) = entry.status.as_mut() {
            status.add(vote);
        }
        Self::try_build_qc(entry, vote.block)
    }

    /// Return the cached certificate of `entry` if there is one, otherwise build and cache a certificate
    /// if enough stake has been accumulated.
    fn try_build_qc(entry: &mut DigestEntry, block: CryptoHash) -> Result<QcStatus, AggregatorError> {
        if let Some(qc) = &entry.qc {
            return Ok(QcStatus::Built(qc.clone()));
        }

        let (Some(status), Some(view)) = (entry.status.as_ref(), entry.block_view) else {
            return Err(AggregatorError::UnknownBlock { block });
        };

        if !status.has_quorum() {
            log::debug!(
                "Insufficient stake for block {:?}: {} of {}",
                block,
                status.accumulated(),
                status.threshold()
            );
            return Ok(QcStatus::InsufficientStake {
                accumulated: status.accumulated(),
                threshold: status.threshold(),
            });
        }

        // The signatures are the only evidence the certificate carries, so they must account for
        // exactly the stake that was counted.
        let recounted = status.recount();
        if recounted != status.accumulated() {
            return Err(InvariantViolation::StakeMismatch {
                block,
                accumulated: status.accumulated(),
                recounted,
            }
            .into());
        }

        let qc = Arc::new(QuorumCertificate {
            view,
            block,
            signatures: status.signatures().clone(),
        });
        entry.qc = Some(qc.clone());
        Ok(QcStatus::Built(qc))
    }
}

/// Configuration variables for the [`VoteAggregator`] struct.
#[derive(Clone, Copy, Debug)]
pub struct AggregatorConfiguration {
    /// Fraction of a committee's total stake that a certificate must strictly exceed.
    pub threshold_fraction: ThresholdFraction,

    /// How many views past the lowest unpruned view a pending vote may claim.
    pub pending_vote_window: u64,
}

impl Default for AggregatorConfiguration {
    fn default() -> Self {
        Self {
            threshold_fraction: ThresholdFraction::two_thirds(),
            pending_vote_window: DEFAULT_PENDING_VOTE_WINDOW,
        }
    }
}

/// Default number of views past the lowest unpruned view that pending votes are accepted for.
pub const DEFAULT_PENDING_VOTE_WINDOW: u64 = 1000;

struct AggregatorIndex {
    entries: HashMap<CryptoHash, Arc<Mutex<DigestEntry>>>,
    views: BTreeMap<ViewNumber, HashSet<CryptoHash>>,
    pruned_through: Option<ViewNumber>,
}

impl AggregatorIndex {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            views: BTreeMap::new(),
            pruned_through: None,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Enumerates the different ways a call to any of [`VoteAggregator`]'s methods can fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregatorError {
    /// See: [`ValidationError`]. The vote was discarded.
    Validation(ValidationError),

    /// The block is not tracked, typically because its view has already been pruned.
    UnknownBlock { block: CryptoHash },

    /// A pending vote claims a view beyond the window of views that pending votes are kept for.
    ViewTooFarAhead { view: ViewNumber, limit: ViewNumber },

    /// See: [`CommitteeError`].
    Committee(CommitteeError),

    /// See: [`InvariantViolation`]. Fatal: the replica must not continue.
    InvariantViolation(InvariantViolation),
}

impl From<ValidationError> for AggregatorError {
    fn from(value: ValidationError) -> Self {
        AggregatorError::Validation(value)
    }
}

impl From<CommitteeError> for AggregatorError {
    fn from(value: CommitteeError) -> Self {
        AggregatorError::Committee(value)
    }
}

impl From<InvariantViolation> for AggregatorError {
    fn from(value: InvariantViolation) -> Self {
        AggregatorError::InvariantViolation(value)
    }
}

/// Internal states that the aggregator must never reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// The same digest was handed in with two different views.
    ConflictingBlockView {
        block: CryptoHash,
        known_view: ViewNumber,
        block_view: ViewNumber,
    },

    /// The stake behind a certificate's signatures differs from the stake that was counted.
    StakeMismatch {
        block: CryptoHash,
        accumulated: TotalPower,
        recounted: TotalPower,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        committee::{EpochCommittees, Identity},
        crypto_primitives::{Ed25519Verifier, Keypair, SigningKey},
        data_types::{Data, Power},
    };

    fn keypairs(n: u8) -> Vec<Keypair> {
        (1..=n)
            .map(|i| Keypair::new(SigningKey::from_bytes(&[i; 32])))
            .collect()
    }

    fn aggregator(
        keypairs: &[Keypair],
        stake: u64,
    ) -> (VoteAggregator<EpochCommittees, Ed25519Verifier>, Committee) {
        let committee = Committee::new(keypairs.iter().map(|keypair| {
            Identity::new(keypair.id(), Power::new(stake), keypair.public_key_bytes())
        }))
        .unwrap();
        let committees = Arc::new(EpochCommittees::new(committee.clone()));
        (
            VoteAggregator::new(AggregatorConfiguration::default(), committees, Ed25519Verifier),
            committee,
        )
    }

    fn vote(keypair: &Keypair, committee: &Committee, block: &Block) -> Vote {
        let index = committee.position(&keypair.id()).unwrap() as u32;
        Vote::new(keypair, block.view, block.hash, index)
    }

    fn block(view: u64) -> Block {
        Block::new(ViewNumber::new(view), QuorumCertificate::genesis_qc(), Data::default())
    }

    #[test]
    fn pending_vote_is_counted_directly_once_block_is_known() {
        let keypairs = keypairs(4);
        let (aggregator, committee) = aggregator(&keypairs, 25);
        let block = block(1);

        let replay = aggregator.build_qc_on_receiving_block(&block);
        assert!(replay.vote_errors.is_empty());
        assert!(matches!(replay.status, Ok(QcStatus::InsufficientStake { .. })));

        for keypair in &keypairs[0..2] {
            let status = aggregator.store_pending_vote(vote(keypair, &committee, &block)).unwrap();
            assert!(matches!(
                status,
                PendingVoteStatus::Incorporated(QcStatus::InsufficientStake { .. })
            ));
        }
        let status = aggregator
            .store_pending_vote(vote(&keypairs[2], &committee, &block))
            .unwrap();
        assert!(matches!(status, PendingVoteStatus::Incorporated(QcStatus::Built(_))));
    }

    #[test]
    fn votes_with_wrong_signer_index_are_rejected() {
        let keypairs = keypairs(4);
        let (aggregator, committee) = aggregator(&keypairs, 25);
        let block = block(1);

        let mut bad = vote(&keypairs[0], &committee, &block);
        bad.signer_index = (bad.signer_index + 1) % 4;
        assert!(matches!(
            aggregator.store_vote_and_build_qc(bad, &block),
            Err(AggregatorError::Validation(ValidationError::SignerIndexMismatch { .. }))
        ));
    }

    #[test]
    fn votes_for_another_block_are_rejected() {
        let keypairs = keypairs(4);
        let (aggregator, committee) = aggregator(&keypairs, 25);
        let block_a = block(1);
        let block_b = Block::new(
            ViewNumber::new(1),
            QuorumCertificate::genesis_qc(),
            Data::new(vec![crate::types::data_types::Datum::new(vec![1])]),
        );

        let vote_for_b = vote(&keypairs[0], &committee, &block_b);
        assert!(matches!(
            aggregator.store_vote_and_build_qc(vote_for_b, &block_a),
            Err(AggregatorError::Validation(ValidationError::BlockMismatch { .. }))
        ));
        assert_eq!(aggregator.num_tracked_blocks(), 0);
    }

    #[test]
    fn pending_votes_with_mismatched_view_are_reported_on_replay() {
        let keypairs = keypairs(4);
        let (aggregator, committee) = aggregator(&keypairs, 25);
        let block = block(3);

        // Correctly signed, but over a view that is not the block's view.
        let index = committee.position(&keypairs[0].id()).unwrap() as u32;
        let misdated = Vote::new(&keypairs[0], ViewNumber::new(2), block.hash, index);
        assert_eq!(
            aggregator.store_pending_vote(misdated).unwrap(),
            PendingVoteStatus::Stored
        );
        aggregator
            .store_pending_vote(vote(&keypairs[1], &committee, &block))
            .unwrap();

        let replay = aggregator.build_qc_on_receiving_block(&block);
        assert_eq!(replay.vote_errors.len(), 1);
        assert_eq!(replay.vote_errors[0].0, keypairs[0].id());
        assert_eq!(
            replay.status,
            Ok(QcStatus::InsufficientStake {
                accumulated: TotalPower::new(25),
                threshold: TotalPower::new(67),
            })
        );
    }

    #[test]
    fn entry_survives_pruning_of_a_lower_claimed_view() {
        let keypairs = keypairs(4);
        let (aggregator, committee) = aggregator(&keypairs, 25);
        let block = block(5);

        let index = committee.position(&keypairs[0].id()).unwrap() as u32;
        let misdated = Vote::new(&keypairs[0], ViewNumber::new(1), block.hash, index);
        aggregator.store_pending_vote(misdated).unwrap();
        aggregator
            .store_pending_vote(vote(&keypairs[1], &committee, &block))
            .unwrap();

        // The digest is indexed under view 1, but its highest claimed view is 5.
        assert_eq!(aggregator.prune_by_view(ViewNumber::new(2)), 0);
        assert_eq!(aggregator.num_tracked_blocks(), 1);

        let replay = aggregator.build_qc_on_receiving_block(&block);
        assert_eq!(replay.vote_errors.len(), 1);
    }

    #[test]
    fn pending_votes_far_ahead_of_the_pruned_views_are_rejected() {
        let keypairs = keypairs(4);
        let (aggregator, committee) = aggregator(&keypairs, 25);
        let window = DEFAULT_PENDING_VOTE_WINDOW;

        let edge = block(window);
        assert_eq!(
            aggregator.store_pending_vote(vote(&keypairs[0], &committee, &edge)).unwrap(),
            PendingVoteStatus::Stored
        );
        let beyond = block(window + 1);
        assert_eq!(
            aggregator.store_pending_vote(vote(&keypairs[0], &committee, &beyond)),
            Err(AggregatorError::ViewTooFarAhead {
                view: ViewNumber::new(window + 1),
                limit: ViewNumber::new(window),
            })
        );
        assert_eq!(aggregator.num_tracked_blocks(), 1);

        // The window moves up with the pruned views.
        aggregator.prune_by_view(ViewNumber::new(10));
        assert_eq!(
            aggregator.store_pending_vote(vote(&keypairs[0], &committee, &beyond)).unwrap(),
            PendingVoteStatus::Stored
        );
        let still_beyond = block(window + 12);
        assert!(matches!(
            aggregator.store_pending_vote(vote(&keypairs[0], &committee, &still_beyond)),
            Err(AggregatorError::ViewTooFarAhead { .. })
        ));
    }
}
