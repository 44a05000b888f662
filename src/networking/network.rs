/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The pluggable network trait.

use crate::types::data_types::ParticipantId;

use super::messages::Message;

/// Peer-to-peer networking provider of a replica.
///
/// Peers are addressed by their [`ParticipantId`]. Delivery is best effort: messages may be dropped,
/// duplicated, delayed, or reordered, and the protocol tolerates all of these.
pub trait Network: Clone + Send {
    /// Send a message to all peers (including the replica itself) without blocking.
    fn broadcast(&mut self, message: Message);

    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: ParticipantId, message: Message);

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(ParticipantId, Message)>;
}
