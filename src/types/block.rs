/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'block' type and its associated methods.
//!
//! Block contents are opaque to vote aggregation: a block is reduced to its view and its
//! [`hash`](Block#structfield.hash), which is the key that votes for it are aggregated under.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    crypto_primitives::{CryptoHasher, Digest},
    data_types::{CryptoHash, Data, ViewNumber},
};
use crate::vote_aggregator::types::QuorumCertificate;

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub view: ViewNumber,
    pub hash: CryptoHash,
    pub justify: QuorumCertificate,
    pub data: Data,
}

impl Block {
    /// Create a new `Block`, computing its hash over the other fields.
    pub fn new(view: ViewNumber, justify: QuorumCertificate, data: Data) -> Block {
        Block {
            view,
            hash: Block::hash(view, &justify, &data),
            justify,
            data,
        }
    }

    /// Compute the SHA256 hash over the Borsh encoding of a block's view, justify, and data.
    pub fn hash(view: ViewNumber, justify: &QuorumCertificate, data: &Data) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        // Borsh-serializing into a Vec cannot fail.
        hasher.update(&view.try_to_vec().unwrap());
        hasher.update(&justify.try_to_vec().unwrap());
        hasher.update(&data.try_to_vec().unwrap());
        CryptoHash::new(hasher.finalize().into())
    }

    /// Check whether the block's hash was computed correctly over its contents.
    pub fn is_hash_correct(&self) -> bool {
        self.hash == Block::hash(self.view, &self.justify, &self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::data_types::Datum;

    #[test]
    fn hash_commits_to_every_field() {
        let block = Block::new(
            ViewNumber::new(4),
            QuorumCertificate::genesis_qc(),
            Data::new(vec![Datum::new(vec![1, 2, 3])]),
        );
        assert!(block.is_hash_correct());

        let mut tampered = block.clone();
        tampered.view = ViewNumber::new(5);
        assert!(!tampered.is_hash_correct());

        let other = Block::new(ViewNumber::new(4), QuorumCertificate::genesis_qc(), Data::default());
        assert_ne!(block.hash, other.hash);
    }
}
