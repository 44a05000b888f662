/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! Signing and verification are opaque capabilities to the rest of the crate: votes are signed through
//! a [`VoteSigner`] and checked through a [`SignatureVerifier`]. The default implementations in this
//! module provide:
//! 1. **Cryptographic Hashes**: provided by the [`sha2`] crate.
//! 2. **Digital Signatures**: provided by the [`ed25519_dalek`] crate.

use super::{
    committee::Identity,
    data_types::{ParticipantId, PublicKeyBytes, SignatureBytes},
};

// re-exports below.
pub use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

pub use ed25519_dalek::{Signature, SignatureError, Signer, SigningKey, Verifier, VerifyingKey};

/// Capability to sign messages on behalf of one participant.
pub trait VoteSigner: Send {
    /// Get the identifier of the participant that this signer signs for.
    fn id(&self) -> ParticipantId;

    /// Sign an arbitrary `message`.
    fn sign(&self, message: &[u8]) -> SignatureBytes;
}

/// Capability to check a signature against the public-key material of an [`Identity`].
pub trait SignatureVerifier: Send + Sync {
    /// Check that `signature` was produced over `message` by the holder of `signer`'s key.
    fn verify(&self, message: &[u8], signature: &SignatureBytes, signer: &Identity) -> bool;
}

/// A facade around [`SigningKey`] that implements method for [`sign`](Self::sign)-ing messages as well
/// as a getter for the [`public`](Self::public) key associated with the signing key.
#[derive(Clone)]
pub struct Keypair(pub(crate) SigningKey);

impl Keypair {
    /// Create a `Keypair` that wraps over `signing_key`.
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Sign an arbitrary `message` with the `Keypair`.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes::new(self.0.sign(message).to_bytes())
    }

    /// Get the `VerifyingKey` of this `Keypair`.
    pub fn public(&self) -> VerifyingKey {
        self.0.verifying_key()
    }

    /// Get the public key of this `Keypair` as opaque key material.
    pub fn public_key_bytes(&self) -> PublicKeyBytes {
        PublicKeyBytes::new(self.public().to_bytes())
    }

    /// Get the `ParticipantId` of this `Keypair`, which is the bytes of its verifying key.
    pub fn id(&self) -> ParticipantId {
        ParticipantId::new(self.public().to_bytes())
    }
}

impl VoteSigner for Keypair {
    fn id(&self) -> ParticipantId {
        Keypair::id(self)
    }

    fn sign(&self, message: &[u8]) -> SignatureBytes {
        Keypair::sign(self, message)
    }
}

/// [`SignatureVerifier`] that interprets public-key material as Ed25519 verifying keys.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, message: &[u8], signature: &SignatureBytes, signer: &Identity) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&signer.public_key.bytes()) else {
            return false;
        };
        let signature = Signature::from_bytes(&signature.bytes());
        verifying_key.verify(message, &signature).is_ok()
    }
}
