//! Deterministic keypairs and committees for integration tests.

use hotstuff_quorum::types::{
    committee::{Committee, Identity},
    crypto_primitives::{Keypair, SigningKey},
    data_types::Power,
};

/// Create `n` keypairs, each derived from a different, fixed secret key.
pub(crate) fn keypairs(n: u8) -> Vec<Keypair> {
    (1..=n)
        .map(|i| Keypair::new(SigningKey::from_bytes(&[i; 32])))
        .collect()
}

/// Create a committee in which `keypairs[i]` holds `stakes[i]`.
pub(crate) fn committee(keypairs: &[Keypair], stakes: &[u64]) -> Committee {
    assert_eq!(keypairs.len(), stakes.len());
    Committee::new(keypairs.iter().zip(stakes).map(|(keypair, stake)| {
        Identity::new(keypair.id(), Power::new(*stake), keypair.public_key_bytes())
    }))
    .unwrap()
}
