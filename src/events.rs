//! Definitions of events for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed.
//!
//! Events are published by the algorithm thread and delivered to handlers on the
//! [event bus](crate::event_bus) thread, so handlers never block consensus.

use std::sync::mpsc::Sender;
use std::time::{Duration, SystemTime};

use crate::{
    networking::messages::Proposal,
    pacemaker::{
        messages::{AdvanceView, TimeoutVote},
        types::TimeoutCertificate,
    },
    types::data_types::{ParticipantId, ViewNumber},
    vote_aggregator::{messages::Vote, types::QuorumCertificate},
};

pub enum Event {
    // Events that involve broadcasting or sending a message.
    Propose(ProposeEvent),
    Vote(VoteEvent),
    TimeoutVote(TimeoutVoteEvent),
    AdvanceView(AdvanceViewEvent),
    // Events that involve receiving a message.
    ReceiveProposal(ReceiveProposalEvent),
    ReceiveVote(ReceiveVoteEvent),
    ReceiveTimeoutVote(ReceiveTimeoutVoteEvent),
    ReceiveAdvanceView(ReceiveAdvanceViewEvent),
    // Progress events.
    StartView(StartViewEvent),
    ViewTimeout(ViewTimeoutEvent),
    CollectQC(CollectQCEvent),
    CollectTC(CollectTCEvent),
    PruneVotes(PruneVotesEvent),
}

impl Event {
    /// Send the event to the event bus, if there is one.
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            // The event bus stops before the algorithm thread does on shutdown.
            let _ = event_publisher.send(self);
        }
    }
}

pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub proposal: Proposal,
}

pub struct VoteEvent {
    pub timestamp: SystemTime,
    pub vote: Vote,
}

pub struct TimeoutVoteEvent {
    pub timestamp: SystemTime,
    pub timeout_vote: TimeoutVote,
}

pub struct AdvanceViewEvent {
    pub timestamp: SystemTime,
    pub advance_view: AdvanceView,
}

pub struct ReceiveProposalEvent {
    pub timestamp: SystemTime,
    pub origin: ParticipantId,
    pub proposal: Proposal,
}

pub struct ReceiveVoteEvent {
    pub timestamp: SystemTime,
    pub origin: ParticipantId,
    pub vote: Vote,
}

pub struct ReceiveTimeoutVoteEvent {
    pub timestamp: SystemTime,
    pub origin: ParticipantId,
    pub timeout_vote: TimeoutVote,
}

pub struct ReceiveAdvanceViewEvent {
    pub timestamp: SystemTime,
    pub origin: ParticipantId,
    pub advance_view: AdvanceView,
}

pub struct StartViewEvent {
    pub timestamp: SystemTime,
    pub view: ViewNumber,
    pub timeout: Duration,
}

pub struct ViewTimeoutEvent {
    pub timestamp: SystemTime,
    pub view: ViewNumber,
    pub timeout: Duration,
}

pub struct CollectQCEvent {
    pub timestamp: SystemTime,
    pub quorum_certificate: QuorumCertificate,
}

pub struct CollectTCEvent {
    pub timestamp: SystemTime,
    pub timeout_certificate: TimeoutCertificate,
}

/// Votes and certificates of views up to and including `view` were dropped from the vote aggregator.
pub struct PruneVotesEvent {
    pub timestamp: SystemTime,
    pub view: ViewNumber,
    pub pruned_blocks: usize,
}
