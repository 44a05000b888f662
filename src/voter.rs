/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Signing and sending votes for safe blocks.
//!
//! Main type: [`Voter`].
//!
//! A replica votes for a block only after the block has been judged safe to vote for (see
//! [`App::is_safe_to_vote`](crate::app::App::is_safe_to_vote)). The vote is sent to the leader of the
//! view after the block's view, since that leader is the one that aggregates votes for the block into a
//! quorum certificate and extends it.
//!
//! The voter can be disabled, e.g., while the replica is catching up on views it missed. A disabled
//! voter never signs.

use std::sync::{mpsc::Sender, Arc};
use std::time::SystemTime;

use crate::{
    events::{Event, VoteEvent},
    leader_selection::{LeaderSelectionError, LeaderSelector},
    networking::{network::Network, sending::SenderHandle},
    types::{
        block::Block,
        committee::{CommitteeError, CommitteeProvider},
        crypto_primitives::VoteSigner,
    },
    vote_aggregator::messages::Vote,
};

/// Signs votes for safe blocks and sends them to the next leader.
pub(crate) struct Voter<N: Network, P: CommitteeProvider> {
    me: Box<dyn VoteSigner>,
    enabled: bool,
    committees: Arc<P>,
    leader_selector: Arc<LeaderSelector>,
    sender: SenderHandle<N>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network, P: CommitteeProvider> Voter<N, P> {
    pub(crate) fn new(
        me: Box<dyn VoteSigner>,
        committees: Arc<P>,
        leader_selector: Arc<LeaderSelector>,
        sender: SenderHandle<N>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            me,
            enabled: true,
            committees,
            leader_selector,
            sender,
            event_publisher,
        }
    }

    pub(crate) fn enable(&mut self) {
        self.enabled = true;
    }

    pub(crate) fn disable(&mut self) {
        self.enabled = false;
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Sign a vote for `block` and send it to the leader of the next view.
    ///
    /// Returns the vote that was sent, or `None` if the voter is disabled or this replica is not in the
    /// committee of the block's view.
    ///
    /// # Preconditions
    ///
    /// `block` is safe to vote for, and this replica has not voted in `block.view` before.
    pub(crate) fn on_safe_block(&mut self, block: &Block) -> Result<Option<Vote>, VoterError> {
        if !self.enabled {
            log::debug!("Voter disabled, not voting for block of view {}", block.view);
            return Ok(None);
        }

        let committee = self.committees.committee_at_view(block.view)?;
        let Some(signer_index) = committee.position(&self.me.id()) else {
            return Ok(None);
        };
        let next_leader = self.leader_selector.by_view(block.view + 1)?;

        let vote = Vote::new(self.me.as_ref(), block.view, block.hash, signer_index as u32);
        self.sender.send(next_leader, vote.clone());

        Event::Vote(VoteEvent {
            timestamp: SystemTime::now(),
            vote: vote.clone(),
        })
        .publish(&self.event_publisher);

        Ok(Some(vote))
    }
}

/// Enumerates the different ways [`Voter::on_safe_block`] can fail.
#[derive(Debug)]
pub enum VoterError {
    /// The committee of the block's view is unavailable.
    Committee(CommitteeError),

    /// The leader of the view after the block's view cannot be determined.
    LeaderSelection(LeaderSelectionError),
}

impl From<CommitteeError> for VoterError {
    fn from(value: CommitteeError) -> Self {
        VoterError::Committee(value)
    }
}

impl From<LeaderSelectionError> for VoterError {
    fn from(value: LeaderSelectionError) -> Self {
        VoterError::LeaderSelection(value)
    }
}
