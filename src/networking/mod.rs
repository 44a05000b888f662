//! Pluggable peer-to-peer (P2P) networking.
//!
//! Users provide an implementation of [`Network`](network::Network). The algorithm thread polls it for
//! messages and sends through it, so implementations must never block.

pub mod network;

pub mod messages;

pub(crate) mod sending;
