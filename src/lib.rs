//! Vote aggregation, leader selection, and view synchronization for HotStuff-family BFT consensus.
//!
//! A set of replicas, each holding some stake, take turns to propose blocks. Every view has one leader,
//! selected deterministically in proportion to stake. Replicas vote for safe proposals, and the leader of
//! the next view aggregates votes into a quorum certificate once the voters hold strictly more than a
//! threshold fraction (by default two-thirds) of the total stake. Views that make no progress time out,
//! and timeout votes are collected into timeout certificates.
//!
//! The components of the crate are:
//! 1. [`vote_aggregator`]: thread-safe accumulation of votes into quorum certificates, including votes
//!    for blocks that have not arrived yet.
//! 2. [`leader_selection`]: the stake-weighted leader schedule.
//! 3. [`pacemaker`]: per-view timers with adaptive timeouts, and timeout certificates.
//! 4. [`replica`]: a runnable replica that wires the above together with a pluggable [`app`] and
//!    [`networking`] provider, reporting what it does through [`events`]. Internally, the replica signs
//!    votes for safe blocks and sends them to the leader of the next view.

pub mod app;

pub mod events;

pub mod leader_selection;

pub mod networking;

pub mod pacemaker;

pub mod replica;

pub mod types;

pub mod vote_aggregator;

pub(crate) mod algorithm;

pub(crate) mod event_bus;

pub(crate) mod logging;

pub(crate) mod voter;
