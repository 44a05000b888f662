/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for structured messages that are sent between replicas as part of the
//! [`Pacemaker`](crate::pacemaker::implementation::Pacemaker) subprotocol.
//!
//! ## Messages
//!
//! The Pacemaker subprotocol involves two types of messages:
//! 1. [`TimeoutVote`], which a replica broadcasts to signal to others that its current view has timed
//!    out.
//! 2. [`AdvanceView`], which a replica broadcasts to prove to others that it is safe to move to the next
//!    view. The proof consists of either:
//!     - a `QuorumCertificate`, which serves as evidence that progress has been made in the view, or
//!     - a `TimeoutCertificate`, which serves as evidence that a quorum of replicas have timed out in
//!       the view.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    types::{
        crypto_primitives::VoteSigner,
        data_types::{ParticipantId, SignatureBytes, ViewNumber},
        signed_messages::{self, SignedMessage},
    },
    vote_aggregator::types::QuorumCertificate,
};

use super::types::TimeoutCertificate;

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum PacemakerMessage {
    TimeoutVote(TimeoutVote),
    AdvanceView(AdvanceView),
}

impl PacemakerMessage {
    pub(crate) fn timeout_vote<S: VoteSigner + ?Sized>(me: &S, view: ViewNumber) -> PacemakerMessage {
        PacemakerMessage::TimeoutVote(TimeoutVote::new(me, view))
    }

    pub fn advance_view(progress_certificate: ProgressCertificate) -> PacemakerMessage {
        PacemakerMessage::AdvanceView(AdvanceView {
            progress_certificate,
        })
    }

    pub fn view(&self) -> ViewNumber {
        match self {
            PacemakerMessage::TimeoutVote(TimeoutVote { view, .. }) => *view,
            PacemakerMessage::AdvanceView(AdvanceView {
                progress_certificate,
            }) => progress_certificate.view(),
        }
    }
}

/// A vote in favour of terminating a given view and moving to the next view. The signature is over the
/// view.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TimeoutVote {
    pub view: ViewNumber,
    pub signer: ParticipantId,
    pub signature: SignatureBytes,
}

impl TimeoutVote {
    pub fn new<S: VoteSigner + ?Sized>(me: &S, view: ViewNumber) -> TimeoutVote {
        TimeoutVote {
            view,
            signer: me.id(),
            signature: me.sign(&TimeoutVote::signing_bytes(view)),
        }
    }

    /// Get the bytes that a timeout vote for `view` is signed over.
    pub fn signing_bytes(view: ViewNumber) -> Vec<u8> {
        // Borsh-serializing into a Vec cannot fail.
        view.try_to_vec().unwrap()
    }
}

impl SignedMessage for TimeoutVote {
    fn message_bytes(&self) -> Vec<u8> {
        TimeoutVote::signing_bytes(self.view)
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }
}

impl signed_messages::Vote for TimeoutVote {
    fn view(&self) -> ViewNumber {
        self.view
    }

    fn signer(&self) -> ParticipantId {
        self.signer
    }
}

/// A message containing a proof that the view can be advanced. The proof can be either a
/// [`QuorumCertificate`] or a [`TimeoutCertificate`] for the view.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AdvanceView {
    pub progress_certificate: ProgressCertificate,
}

/// Proof that either:
/// 1. A quorum voted for a block in the view ([`QuorumCertificate`]), or
/// 2. A quorum voted for terminating the view on timing out ([`TimeoutCertificate`]).
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ProgressCertificate {
    TimeoutCertificate(TimeoutCertificate),
    QuorumCertificate(QuorumCertificate),
}

impl ProgressCertificate {
    pub fn view(&self) -> ViewNumber {
        match self {
            ProgressCertificate::TimeoutCertificate(TimeoutCertificate { view, .. }) => *view,
            ProgressCertificate::QuorumCertificate(QuorumCertificate { view, .. }) => *view,
        }
    }
}

impl From<QuorumCertificate> for ProgressCertificate {
    fn from(value: QuorumCertificate) -> Self {
        ProgressCertificate::QuorumCertificate(value)
    }
}

impl From<TimeoutCertificate> for ProgressCertificate {
    fn from(value: TimeoutCertificate) -> Self {
        ProgressCertificate::TimeoutCertificate(value)
    }
}
