/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The algorithm thread, which drives a replica through views.
//!
//! The algorithm thread is a loop that, on every iteration:
//! 1. Checks for a shutdown signal.
//! 2. Ticks the [`Pacemaker`], which fires the view timer if the current view's deadline has passed.
//! 3. If this replica leads the current view, has not proposed in it yet, and the proposal delay has
//!    elapsed, calls the [`App`] to produce data, and broadcasts a proposal.
//! 4. Polls the network for one message and handles it:
//!     * [On receiving a proposal](Algorithm::on_receive_proposal):
//!         - Check that the block's hash is correct, that it was proposed by the leader of its view, and
//!           that its `justify` is a correct quorum certificate.
//!         - Process the `justify`, which may move the replica into the view of the block.
//!         - Record the block and replay the votes for it that arrived before it.
//!         - If the block is for the current view and the [`App`] judges it safe, vote for it.
//!     * [On receiving a vote](Algorithm::on_receive_vote): hand it to the [`VoteAggregator`], as a
//!       pending vote if the block is not known yet.
//!     * [On receiving a timeout vote](Algorithm::on_receive_timeout_vote): hand it to the
//!       [`Pacemaker`].
//!     * [On receiving an advance view](Algorithm::on_receive_advance_view): check the certificate inside
//!       and process it.
//!
//! Every certificate that ends the current view (a quorum certificate collected locally or received,
//! or a timeout certificate) moves the pacemaker into the next view, is passed to the [`App`], and
//! causes votes and blocks for the views before the certificate's view to be pruned. Certificates
//! collected locally are broadcast in an `AdvanceView` message.

use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crate::{
    app::App,
    events::*,
    leader_selection::LeaderSelector,
    networking::{
        messages::{Message, Proposal},
        network::Network,
        sending::SenderHandle,
    },
    pacemaker::{
        implementation::Pacemaker,
        messages::{AdvanceView, PacemakerMessage, ProgressCertificate, TimeoutVote},
    },
    types::{
        block::Block,
        committee::{Committee, CommitteeProvider},
        crypto_primitives::{Keypair, SignatureVerifier},
        data_types::{CryptoHash, ParticipantId, ThresholdFraction, ViewNumber},
    },
    vote_aggregator::{
        messages::Vote,
        types::{PendingVoteStatus, QcStatus, QuorumCertificate},
        AggregatorError, VoteAggregator,
    },
    voter::Voter,
};

pub(crate) struct Algorithm<A, N, P, V>
where
    A: App + 'static,
    N: Network + 'static,
    P: CommitteeProvider + 'static,
    V: SignatureVerifier + Clone + 'static,
{
    me: Keypair,
    app: A,
    network: N,
    sender: SenderHandle<N>,
    committees: Arc<P>,
    verifier: V,
    threshold_fraction: ThresholdFraction,
    leader_selector: Arc<LeaderSelector>,
    vote_aggregator: Arc<VoteAggregator<P, V>>,
    pacemaker: Pacemaker<N>,
    voter: Voter<N, P>,
    state: AlgorithmState,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
}

/// Per-replica protocol state that lives only in memory.
struct AlgorithmState {
    /// Blocks received in proposals, keyed by hash. Blocks of views before the last pruned view are
    /// dropped.
    known_blocks: HashMap<CryptoHash, Block>,

    /// The quorum certificate with the highest view known. Proposals extend the block it certifies.
    highest_qc: QuorumCertificate,

    /// The view this replica last proposed in.
    proposed_view: Option<ViewNumber>,

    /// The view this replica last voted in.
    voted_view: Option<ViewNumber>,

    /// Votes and blocks of views up to and including this view were pruned.
    pruned_through: Option<ViewNumber>,
}

impl<A, N, P, V> Algorithm<A, N, P, V>
where
    A: App + 'static,
    N: Network + 'static,
    P: CommitteeProvider + 'static,
    V: SignatureVerifier + Clone + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        me: Keypair,
        app: A,
        network: N,
        committees: Arc<P>,
        verifier: V,
        threshold_fraction: ThresholdFraction,
        leader_selector: Arc<LeaderSelector>,
        vote_aggregator: Arc<VoteAggregator<P, V>>,
        pacemaker: Pacemaker<N>,
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        let voter = Voter::new(
            Box::new(me.clone()),
            committees.clone(),
            leader_selector.clone(),
            SenderHandle::new(network.clone()),
            event_publisher.clone(),
        );
        Self {
            me,
            app,
            sender: SenderHandle::new(network.clone()),
            network,
            committees,
            verifier,
            threshold_fraction,
            leader_selector,
            vote_aggregator,
            pacemaker,
            voter,
            state: AlgorithmState {
                known_blocks: HashMap::new(),
                highest_qc: QuorumCertificate::genesis_qc(),
                proposed_view: None,
                voted_view: None,
                pruned_through: None,
            },
            shutdown_signal,
            event_publisher,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || loop {
            match self.shutdown_signal.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("Algorithm thread disconnected from main thread")
                }
            }

            let cur_view = self.pacemaker.query().view;
            let Some(committee) = self.committee_at(cur_view) else {
                thread::sleep(Duration::from_millis(10));
                continue;
            };

            // 1. Fire the view timer if the deadline passed.
            self.pacemaker.tick(&self.me, &committee);

            // 2. Propose if I lead the current view.
            self.propose_if_due(cur_view);

            // 3. Handle one message from the network.
            match self.network.recv() {
                Some((origin, msg)) => self.on_receive_msg(origin, msg),
                None => thread::sleep(Duration::from_millis(1)),
            }
        })
    }

    fn on_receive_msg(&mut self, origin: ParticipantId, msg: Message) {
        match msg {
            Message::Proposal(proposal) => self.on_receive_proposal(origin, proposal),
            Message::Vote(vote) => self.on_receive_vote(origin, vote),
            Message::PacemakerMessage(PacemakerMessage::TimeoutVote(timeout_vote)) => {
                self.on_receive_timeout_vote(origin, timeout_vote)
            }
            Message::PacemakerMessage(PacemakerMessage::AdvanceView(advance_view)) => {
                self.on_receive_advance_view(origin, advance_view)
            }
        }
    }

    fn propose_if_due(&mut self, cur_view: ViewNumber) {
        if self.state.proposed_view == Some(cur_view) || !self.pacemaker.is_proposal_due() {
            return;
        }
        match self.leader_selector.is_leader(&self.me.id(), cur_view) {
            Ok(true) => (),
            Ok(false) => return,
            Err(err) => {
                log::warn!("Cannot determine the leader of view {}: {:?}", cur_view, err);
                return;
            }
        }

        let justify = self.state.highest_qc.clone();
        let data = self.app.produce_data(cur_view, &justify);
        let proposal = Proposal {
            block: Block::new(cur_view, justify, data),
        };
        self.sender.broadcast(proposal.clone());
        self.state.proposed_view = Some(cur_view);

        Event::Propose(ProposeEvent {
            timestamp: SystemTime::now(),
            proposal,
        })
        .publish(&self.event_publisher);
    }

    fn on_receive_proposal(&mut self, origin: ParticipantId, proposal: Proposal) {
        Event::ReceiveProposal(ReceiveProposalEvent {
            timestamp: SystemTime::now(),
            origin,
            proposal: proposal.clone(),
        })
        .publish(&self.event_publisher);

        let block = proposal.block;

        // 1. Check the proposal.
        if !block.is_hash_correct() {
            log::debug!("Discarding proposal with incorrect hash from {:?}", origin);
            return;
        }
        if !matches!(self.leader_selector.is_leader(&origin, block.view), Ok(true)) {
            log::debug!(
                "Discarding proposal for view {} from non-leader {:?}",
                block.view,
                origin
            );
            return;
        }
        if !self.is_qc_correct(&block.justify) {
            log::debug!("Discarding proposal for view {} with incorrect justify", block.view);
            return;
        }

        // 2. Process the justify. This may move us into the view of the block.
        if !block.justify.is_genesis_qc() {
            self.on_progress_certificate(block.justify.clone().into(), false);
        }

        // 3. Record the block and replay the votes that arrived before it.
        if self.state.pruned_through >= Some(block.view) {
            return;
        }
        self.on_known_block(block)
    }

    fn on_known_block(&mut self, block: Block) {
        let outcome = self.vote_aggregator.build_qc_on_receiving_block(&block);
        for (signer, error) in &outcome.vote_errors {
            log::debug!("Discarding pending vote of {:?}: {:?}", signer, error);
        }
        self.on_qc_status(outcome.status);
        self.state.known_blocks.insert(block.hash, block.clone());

        // 4. Vote if the block is for the current view.
        let cur_view = self.pacemaker.query().view;
        if block.view > cur_view {
            // We are behind: the block's view has not started here yet.
            self.voter.disable();
            return;
        }
        self.voter.enable();
        if block.view < cur_view || self.state.voted_view >= Some(block.view) {
            return;
        }
        if !self.app.is_safe_to_vote(&block) {
            return;
        }
        match self.voter.on_safe_block(&block) {
            Ok(Some(_)) => {
                self.state.voted_view = Some(block.view);
                self.pacemaker.on_vote_sent(block.view);
            }
            Ok(None) => (),
            Err(err) => log::warn!("Cannot vote for block of view {}: {:?}", block.view, err),
        }
    }

    fn on_receive_vote(&mut self, origin: ParticipantId, vote: Vote) {
        Event::ReceiveVote(ReceiveVoteEvent {
            timestamp: SystemTime::now(),
            origin,
            vote: vote.clone(),
        })
        .publish(&self.event_publisher);

        let status = match self.state.known_blocks.get(&vote.block) {
            Some(block) => self.vote_aggregator.store_vote_and_build_qc(vote, block),
            None => match self.vote_aggregator.store_pending_vote(vote) {
                Ok(PendingVoteStatus::Stored) => return,
                Ok(PendingVoteStatus::Incorporated(status)) => Ok(status),
                Err(err) => Err(err),
            },
        };
        self.on_qc_status(status)
    }

    fn on_qc_status(&mut self, status: Result<QcStatus, AggregatorError>) {
        match status {
            Ok(QcStatus::Built(qc)) => {
                // The aggregator keeps returning the same certificate for later votes.
                if qc.view <= self.state.highest_qc.view && !self.state.highest_qc.is_genesis_qc() {
                    return;
                }
                Event::CollectQC(CollectQCEvent {
                    timestamp: SystemTime::now(),
                    quorum_certificate: (*qc).clone(),
                })
                .publish(&self.event_publisher);
                self.on_progress_certificate((*qc).clone().into(), true);
            }
            Ok(QcStatus::InsufficientStake { .. }) => (),
            Err(AggregatorError::InvariantViolation(violation)) => {
                panic!("Vote aggregator invariant violated: {:?}", violation)
            }
            Err(err) => log::debug!("Discarding vote: {:?}", err),
        }
    }

    fn on_receive_timeout_vote(&mut self, origin: ParticipantId, timeout_vote: TimeoutVote) {
        if let Some(tc) =
            self.pacemaker
                .on_receive_timeout_vote(timeout_vote, &origin, &self.verifier)
        {
            self.on_progress_certificate(tc.into(), true);
        }
    }

    fn on_receive_advance_view(&mut self, origin: ParticipantId, advance_view: AdvanceView) {
        Event::ReceiveAdvanceView(ReceiveAdvanceViewEvent {
            timestamp: SystemTime::now(),
            origin,
            advance_view: advance_view.clone(),
        })
        .publish(&self.event_publisher);

        let certificate = advance_view.progress_certificate;
        if certificate.view() < self.pacemaker.query().view {
            return;
        }
        let is_correct = match &certificate {
            ProgressCertificate::QuorumCertificate(qc) => {
                !qc.is_genesis_qc() && self.is_qc_correct(qc)
            }
            ProgressCertificate::TimeoutCertificate(tc) => match self.committee_at(tc.view) {
                Some(committee) => tc.is_correct(&committee, self.threshold_fraction, &self.verifier),
                None => false,
            },
        };
        if is_correct {
            self.on_progress_certificate(certificate, false);
        } else {
            log::debug!("Discarding incorrect certificate from {:?}", origin);
        }
    }

    /// Process a correct certificate: move into the view after it, and prune what it made obsolete.
    /// Certificates for views before the current view only update the highest QC.
    fn on_progress_certificate(&mut self, certificate: ProgressCertificate, broadcast: bool) {
        if let ProgressCertificate::QuorumCertificate(qc) = &certificate {
            if qc.view > self.state.highest_qc.view || self.state.highest_qc.is_genesis_qc() {
                self.state.highest_qc = qc.clone();
            }
        }

        let view = certificate.view();
        let Some(next_committee) = self.committee_at(view + 1) else {
            return;
        };
        match self
            .pacemaker
            .on_progress_certificate(&certificate, next_committee)
        {
            Ok(true) => (),
            Ok(false) => return,
            Err(err) => {
                log::warn!("Cannot advance past view {}: {:?}", view, err);
                return;
            }
        }

        self.app.on_certificate(&certificate);

        if broadcast {
            let advance_view = AdvanceView {
                progress_certificate: certificate,
            };
            self.sender.broadcast(advance_view.clone());
            Event::AdvanceView(AdvanceViewEvent {
                timestamp: SystemTime::now(),
                advance_view,
            })
            .publish(&self.event_publisher);
        }

        // Prune what can no longer contribute to a certificate for the new view.
        if let Some(prune_view) = view.prev() {
            if self.state.pruned_through >= Some(prune_view) {
                return;
            }
            self.state.pruned_through = Some(prune_view);
            let pruned_blocks = self.vote_aggregator.prune_by_view(prune_view);
            self.state
                .known_blocks
                .retain(|_, block| block.view > prune_view);
            if pruned_blocks > 0 {
                Event::PruneVotes(PruneVotesEvent {
                    timestamp: SystemTime::now(),
                    view: prune_view,
                    pruned_blocks,
                })
                .publish(&self.event_publisher);
            }
        }
    }

    fn is_qc_correct(&self, qc: &QuorumCertificate) -> bool {
        if qc.is_genesis_qc() {
            return true;
        }
        match self.committee_at(qc.view) {
            Some(committee) => qc.is_correct(&committee, self.threshold_fraction, &self.verifier),
            None => false,
        }
    }

    fn committee_at(&self, view: ViewNumber) -> Option<Arc<Committee>> {
        match self.committees.committee_at_view(view) {
            Ok(committee) => Some(committee),
            Err(err) => {
                log::warn!("No committee for view {}: {:?}", view, err);
                None
            }
        }
    }
}
