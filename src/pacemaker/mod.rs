//! Subprotocol for leaving views that make no progress.
//!
//! # View phases
//!
//! Within a view, a replica moves through the following phases ([`ViewPhase`](types::ViewPhase)):
//! 1. **AwaitingProposal**: the view has just been entered, and the replica is waiting for the view's
//!    leader to propose a block.
//! 2. **Voted**: the replica voted for the proposal of the view.
//! 3. **AwaitingCertificate**: the view's timer fired before the view ended. The replica has broadcast a
//!    `TimeoutVote` and is waiting for a certificate that lets it leave the view.
//! 4. **Advanced**: the replica left the view. From this point on, timers of the view are stale and are
//!    ignored.
//!
//! A replica leaves its current view when one of the following happens:
//! 1. It learns of a [`QuorumCertificate`](crate::vote_aggregator::types::QuorumCertificate) for the
//!    current view or a higher view, formed locally or received in an `AdvanceView` message.
//! 2. It learns of a [`TimeoutCertificate`](types::TimeoutCertificate) for the current view or a higher
//!    view. Timeout certificates are formed by collecting `TimeoutVote`s from participants holding more
//!    than the threshold fraction of the committee's stake.
//!
//! In both cases the replica enters the view right after the certificate's view.
//!
//! # Adaptive timeouts
//!
//! Every timeout grows the timeout that the next views are entered with, up to a configured maximum, and
//! every view that ends with a certificate before the local timer fires shrinks it, down to a configured
//! minimum. When the network is slow, views get longer until a quorum of replicas can finish them. When
//! it is fast again, views get shorter.

pub mod messages;

pub(crate) mod implementation;

pub mod types;
