//! Exhaustive enumerations around every message variant exchanged between replicas.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    pacemaker::messages::{AdvanceView, PacemakerMessage, TimeoutVote},
    types::{block::Block, data_types::ViewNumber},
    vote_aggregator::messages::Vote,
};

/// All message variants exchanged between replicas.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Message {
    /// See: [`Proposal`].
    Proposal(Proposal),

    /// See: [`Vote`].
    Vote(Vote),

    /// See: [`PacemakerMessage`].
    PacemakerMessage(PacemakerMessage),
}

impl Message {
    /// Get the `view` field of the inner message.
    pub fn view(&self) -> ViewNumber {
        match self {
            Message::Proposal(proposal) => proposal.block.view,
            Message::Vote(vote) => vote.view,
            Message::PacemakerMessage(msg) => msg.view(),
        }
    }

    /// Get the size of the message once serialized.
    pub fn size(&self) -> u64 {
        self.try_to_vec().map(|bytes| bytes.len() as u64).unwrap_or(0)
    }
}

/// Broadcast by the leader of a view to propose a new block.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Proposal {
    pub block: Block,
}

impl From<Proposal> for Message {
    fn from(value: Proposal) -> Self {
        Message::Proposal(value)
    }
}

impl From<Vote> for Message {
    fn from(value: Vote) -> Self {
        Message::Vote(value)
    }
}

impl From<PacemakerMessage> for Message {
    fn from(value: PacemakerMessage) -> Self {
        Message::PacemakerMessage(value)
    }
}

impl From<TimeoutVote> for Message {
    fn from(value: TimeoutVote) -> Self {
        Message::PacemakerMessage(PacemakerMessage::TimeoutVote(value))
    }
}

impl From<AdvanceView> for Message {
    fn from(value: AdvanceView) -> Self {
        Message::PacemakerMessage(PacemakerMessage::AdvanceView(value))
    }
}
