/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Signed messages.

use super::{
    committee::Identity,
    crypto_primitives::SignatureVerifier,
    data_types::{ParticipantId, SignatureBytes, ViewNumber},
};

/// Data types that contain: 1. A message, and 2. A digital signature over said message whose
/// correctness can be verified against the key material of an [`Identity`].
pub trait SignedMessage: Clone {
    /// Get the bytes that are passed as input into the signing function to form the signature
    /// of the `SignedMessage`.
    fn message_bytes(&self) -> Vec<u8>;

    /// Get the signature of the `SignedMessage`.
    fn signature_bytes(&self) -> SignatureBytes;

    /// Verify that `signature_bytes` is a signature created by `signer` over `message_bytes`.
    fn is_correct<V: SignatureVerifier + ?Sized>(&self, verifier: &V, signer: &Identity) -> bool {
        verifier.verify(&self.message_bytes(), &self.signature_bytes(), signer)
    }
}

/// Signed messages that express a participant's position on something that happened in a particular
/// view.
pub trait Vote: SignedMessage {
    /// Get the view that the `Vote` is about.
    fn view(&self) -> ViewNumber;

    /// Get the participant that claims to have signed the `Vote`.
    fn signer(&self) -> ParticipantId;
}
