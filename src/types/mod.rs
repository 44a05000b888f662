//! Types and traits that are used across multiple components of the crate.
//!
//! Other types and traits, specific to single components, can be found in the "types" submodules of
//! their components, e.g., [`crate::vote_aggregator::types`].

pub mod block;

pub mod committee;

pub mod crypto_primitives;

pub mod data_types;

pub mod signed_messages;
