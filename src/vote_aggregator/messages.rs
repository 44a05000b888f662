/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the votes that replicas send to the next leader, and that the
//! [`VoteAggregator`](super::implementation::VoteAggregator) aggregates into quorum certificates.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    crypto_primitives::VoteSigner,
    data_types::{CryptoHash, ParticipantId, SignatureBytes, ViewNumber},
    signed_messages::{self, SignedMessage},
};

/// A participant's signed endorsement of the block identified by `block`, proposed in `view`.
///
/// The signature covers `(view, block)` only. `signer_index` is a hint: the position that the signer
/// claims to occupy in the committee of `view`, checked against the committee during validation.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Vote {
    pub view: ViewNumber,
    pub block: CryptoHash,
    pub signer: ParticipantId,
    pub signer_index: u32,
    pub signature: SignatureBytes,
}

impl Vote {
    /// Create a `Vote` for `block` in `view`, signed by `me`.
    pub fn new<S: VoteSigner + ?Sized>(
        me: &S,
        view: ViewNumber,
        block: CryptoHash,
        signer_index: u32,
    ) -> Vote {
        let signature = me.sign(&Vote::signing_bytes(view, block));
        Vote {
            view,
            block,
            signer: me.id(),
            signer_index,
            signature,
        }
    }

    /// Get the bytes that a vote for `block` in `view` is signed over.
    pub fn signing_bytes(view: ViewNumber, block: CryptoHash) -> Vec<u8> {
        // Borsh-serializing into a Vec cannot fail.
        (view, block).try_to_vec().unwrap()
    }
}

impl SignedMessage for Vote {
    fn message_bytes(&self) -> Vec<u8> {
        Vote::signing_bytes(self.view, self.block)
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }
}

impl signed_messages::Vote for Vote {
    fn view(&self) -> ViewNumber {
        self.view
    }

    fn signer(&self) -> ParticipantId {
        self.signer
    }
}
