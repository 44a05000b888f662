/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Event-driven implementation of the Pacemaker subprotocol.
//!
//! Main type: [`Pacemaker`].

use std::{
    sync::{mpsc::Sender, Arc},
    time::{Duration, Instant, SystemTime},
};

use crate::{
    events::{
        CollectTCEvent, Event, ReceiveTimeoutVoteEvent, StartViewEvent, TimeoutVoteEvent,
        ViewTimeoutEvent,
    },
    networking::{network::Network, sending::SenderHandle},
    pacemaker::{
        messages::{PacemakerMessage, ProgressCertificate},
        types::{TimeoutCertificate, TimeoutVoteCollector, ViewPhase},
    },
    types::{
        committee::Committee,
        crypto_primitives::{Keypair, SignatureVerifier},
        data_types::{ParticipantId, ThresholdFraction, ViewNumber},
    },
    vote_aggregator::types::QuorumCertificate,
};

use super::messages::TimeoutVote;

/// A single participant in the Pacemaker subprotocol.
///
/// # Usage
///
/// After creating an instance of `Pacemaker` using [`new`](Self::new), the caller should interact with
/// it by calling the following methods:
/// 1. [`tick`](Self::tick): this method should be called *as often as is practical*. It fires the view
///    timer once the current view's deadline has passed.
/// 2. [`on_qc`](Self::on_qc) and [`on_tc`](Self::on_tc): these methods should be called whenever a new
///    certificate is formed or received. Both may move the Pacemaker into a new view.
/// 3. [`on_receive_timeout_vote`](Self::on_receive_timeout_vote): this method should be called whenever a
///    `TimeoutVote` is received.
/// 4. [`query`](Self::query): whenever any of the above is called, the internal view counter of the
///    `Pacemaker` may be updated. The caller should call `query` whenever it needs to see this counter.
///
/// # Adaptive timeouts
///
/// Every view gets the same timeout when it is entered: the Pacemaker's current timeout. The current
/// timeout grows by [`timeout_increase_factor`](PacemakerConfiguration::timeout_increase_factor) every
/// time a view times out, and shrinks by
/// [`timeout_decrease_factor`](PacemakerConfiguration::timeout_decrease_factor) every time a view ends
/// with a quorum certificate, or with a timeout certificate before the local timer fired, staying within
/// `[min_view_timeout, max_view_timeout]`.
pub(crate) struct Pacemaker<N: Network> {
    config: PacemakerConfiguration,
    state: PacemakerState,
    view_info: ViewInfo,
    sender: SenderHandle<N>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network> Pacemaker<N> {
    /// Create a new `Pacemaker` instance that starts in `init_view`, collecting timeout votes from
    /// `init_committee`.
    pub(crate) fn new(
        config: PacemakerConfiguration,
        sender: SenderHandle<N>,
        init_view: ViewNumber,
        init_committee: Arc<Committee>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        let timeout = config
            .initial_view_timeout
            .clamp(config.min_view_timeout, config.max_view_timeout);
        let state = PacemakerState {
            timeout,
            phase: ViewPhase::AwaitingProposal,
            timeout_votes: TimeoutVoteCollector::new(
                init_view,
                init_committee,
                config.threshold_fraction,
            ),
        };
        let view_info = ViewInfo::new(init_view, Instant::now(), timeout);
        Self {
            config,
            state,
            view_info,
            sender,
            event_publisher,
        }
    }

    /// Query the Pacemaker for its current `ViewInfo`.
    pub(crate) fn query(&self) -> &ViewInfo {
        &self.view_info
    }

    /// Get the phase that this replica is in within `view`. Every view below the current view has been
    /// [`Advanced`](ViewPhase::Advanced) from.
    pub(crate) fn phase(&self, view: ViewNumber) -> ViewPhase {
        if view < self.view_info.view {
            ViewPhase::Advanced
        } else {
            self.state.phase
        }
    }

    /// Get the timeout that the next view will be entered with.
    pub(crate) fn current_timeout(&self) -> Duration {
        self.state.timeout
    }

    /// Record that this replica voted for the proposal of `view`. No-op if `view` is not the current
    /// view.
    pub(crate) fn on_vote_sent(&mut self, view: ViewNumber) {
        if view == self.view_info.view && self.state.phase == ViewPhase::AwaitingProposal {
            self.state.phase = ViewPhase::Voted;
        }
    }

    /// Cause the Pacemaker to check the current time ("clock tick"), firing the view timer if the
    /// current view's deadline has passed.
    ///
    /// Returns whether the view timer fired.
    pub(crate) fn tick(&mut self, me: &Keypair, committee: &Committee) -> bool {
        if Instant::now() > self.view_info.deadline {
            self.on_view_timeout(self.view_info.view, me, committee)
        } else {
            false
        }
    }

    /// Execute the required steps when the timer of `view` fires:
    /// 1. Grow the current timeout.
    /// 2. If this replica is in `committee`, broadcast a `TimeoutVote` for `view`.
    /// 3. Re-arm the timer of `view` with the grown timeout, so that the `TimeoutVote` is re-broadcast if
    ///    the view still has not ended by then.
    ///
    /// A timer firing for a view that is not the current view is stale, and is ignored. Returns whether
    /// the timer was handled.
    pub(crate) fn on_view_timeout(
        &mut self,
        view: ViewNumber,
        me: &Keypair,
        committee: &Committee,
    ) -> bool {
        if view != self.view_info.view || self.phase(view) == ViewPhase::Advanced {
            log::debug!(
                "Ignoring stale timer of view {} in view {}",
                view,
                self.view_info.view
            );
            return false;
        }

        // 1. Grow the timeout.
        let timed_out_after = self.view_info.timeout;
        // A product too large for a Duration saturates at the maximum.
        self.state.timeout = Duration::try_from_secs_f64(
            self.state.timeout.as_secs_f64() * self.config.timeout_increase_factor,
        )
        .unwrap_or(self.config.max_view_timeout)
        .min(self.config.max_view_timeout);
        self.state.phase = ViewPhase::AwaitingCertificate;

        Event::ViewTimeout(ViewTimeoutEvent {
            timestamp: SystemTime::now(),
            view,
            timeout: timed_out_after,
        })
        .publish(&self.event_publisher);

        // 2. Broadcast a timeout vote.
        if committee.contains(&me.id()) {
            let pacemaker_message = PacemakerMessage::timeout_vote(me, view);
            self.sender.broadcast(pacemaker_message.clone());
            if let PacemakerMessage::TimeoutVote(timeout_vote) = pacemaker_message {
                Event::TimeoutVote(TimeoutVoteEvent {
                    timestamp: SystemTime::now(),
                    timeout_vote,
                })
                .publish(&self.event_publisher)
            }
        }

        // 3. Re-arm the timer of the current view.
        self.view_info = ViewInfo::new(view, Instant::now(), self.state.timeout);
        true
    }

    /// Execute the required steps in the Pacemaker subprotocol upon receiving a `TimeoutVote` from the
    /// replica identified by `origin`, returning a `TimeoutCertificate` if one was formed.
    ///
    /// Timeout votes for any view other than the current view are ignored.
    pub(crate) fn on_receive_timeout_vote<V: SignatureVerifier + ?Sized>(
        &mut self,
        timeout_vote: TimeoutVote,
        origin: &ParticipantId,
        verifier: &V,
    ) -> Option<TimeoutCertificate> {
        Event::ReceiveTimeoutVote(ReceiveTimeoutVoteEvent {
            timestamp: SystemTime::now(),
            origin: *origin,
            timeout_vote: timeout_vote.clone(),
        })
        .publish(&self.event_publisher);

        if timeout_vote.view != self.state.timeout_votes.view() {
            return None;
        }

        let new_tc = self.state.timeout_votes.collect(timeout_vote, verifier)?;
        Event::CollectTC(CollectTCEvent {
            timestamp: SystemTime::now(),
            timeout_certificate: new_tc.clone(),
        })
        .publish(&self.event_publisher);
        Some(new_tc)
    }

    /// Execute the required steps upon learning of a quorum certificate: shrink the current timeout and
    /// enter the view after the certificate's view.
    ///
    /// Certificates for views below the current view are ignored. Returns whether the view was advanced.
    ///
    /// # Preconditions
    ///
    /// `qc` is correct, and `next_committee` is the committee of `qc.view + 1`.
    pub(crate) fn on_qc(
        &mut self,
        qc: &QuorumCertificate,
        next_committee: Arc<Committee>,
    ) -> Result<bool, PacemakerError> {
        if qc.view < self.view_info.view {
            return Ok(false);
        }

        self.shrink_timeout();
        self.update_view(qc.view + 1, next_committee)?;
        Ok(true)
    }

    /// Execute the required steps upon learning of a timeout certificate: shrink the current timeout if
    /// the local timer of the current view has not fired yet, then enter the view after the
    /// certificate's view.
    ///
    /// A timer that already fired has grown the timeout for the next view, which the certificate does
    /// not undo.
    ///
    /// Certificates for views below the current view are ignored. Returns whether the view was advanced.
    ///
    /// # Preconditions
    ///
    /// `tc` is correct, and `next_committee` is the committee of `tc.view + 1`.
    pub(crate) fn on_tc(
        &mut self,
        tc: &TimeoutCertificate,
        next_committee: Arc<Committee>,
    ) -> Result<bool, PacemakerError> {
        if tc.view < self.view_info.view {
            return Ok(false);
        }

        if self.state.phase != ViewPhase::AwaitingCertificate {
            self.shrink_timeout();
        }
        self.update_view(tc.view + 1, next_committee)?;
        Ok(true)
    }

    /// Dispatch a verified `certificate` to [`on_qc`](Self::on_qc) or [`on_tc`](Self::on_tc).
    pub(crate) fn on_progress_certificate(
        &mut self,
        certificate: &ProgressCertificate,
        next_committee: Arc<Committee>,
    ) -> Result<bool, PacemakerError> {
        match certificate {
            ProgressCertificate::QuorumCertificate(qc) => self.on_qc(qc, next_committee),
            ProgressCertificate::TimeoutCertificate(tc) => self.on_tc(tc, next_committee),
        }
    }

    /// Get how long the leader of the current view waits after entering it before proposing.
    pub(crate) fn proposal_delay(&self) -> Duration {
        self.view_info
            .timeout
            .mul_f64(self.config.proposal_delay_fraction)
    }

    /// Check whether the proposal delay of the current view has elapsed.
    pub(crate) fn is_proposal_due(&self) -> bool {
        Instant::now() >= self.view_info.entered + self.proposal_delay()
    }

    fn shrink_timeout(&mut self) {
        self.state.timeout = self
            .state
            .timeout
            .mul_f64(self.config.timeout_decrease_factor)
            .max(self.config.min_view_timeout);
    }

    /// Update the Pacemaker's state in order to enter a specified `next_view`. Replacing the view's
    /// deadline cancels the timer of the view being left.
    ///
    /// # Preconditions
    ///
    /// This function should only be called if `next_view` is greater than the current view. Otherwise, an
    /// [`UpdateViewError`] will be returned.
    fn update_view(
        &mut self,
        next_view: ViewNumber,
        next_committee: Arc<Committee>,
    ) -> Result<(), UpdateViewError> {
        let cur_view = self.view_info.view;

        // 1. Return an error if the precondition that `next_view` must be greater than the current view is
        //    violated.
        if next_view <= cur_view {
            return Err(UpdateViewError::NonIncreasingViewError {
                cur_view,
                next_view,
            });
        }

        // 2. Update the Pacemaker's `view_info` state.
        self.view_info = ViewInfo::new(next_view, Instant::now(), self.state.timeout);
        self.state.phase = ViewPhase::AwaitingProposal;

        // 3. Replace our current `timeout_votes` collector with a new one for the view we just entered.
        self.state.timeout_votes =
            TimeoutVoteCollector::new(next_view, next_committee, self.config.threshold_fraction);

        Event::StartView(StartViewEvent {
            timestamp: SystemTime::now(),
            view: next_view,
            timeout: self.state.timeout,
        })
        .publish(&self.event_publisher);

        Ok(())
    }
}

/// Configuration variables for the [`Pacemaker`] struct.
#[derive(Clone, Debug)]
pub(crate) struct PacemakerConfiguration {
    /// Fraction of stake that timeout certificates must exceed.
    pub(crate) threshold_fraction: ThresholdFraction,

    /// Timeout of the first view.
    pub(crate) initial_view_timeout: Duration,

    /// Lower bound on the timeout of any view.
    pub(crate) min_view_timeout: Duration,

    /// Upper bound on the timeout of any view.
    pub(crate) max_view_timeout: Duration,

    /// Factor the timeout is multiplied with after a view times out. At least 1.
    pub(crate) timeout_increase_factor: f64,

    /// Factor the timeout is multiplied with after a view ends with a certificate before timing out
    /// locally. At most 1.
    pub(crate) timeout_decrease_factor: f64,

    /// Fraction of the view timeout that the leader waits before proposing.
    pub(crate) proposal_delay_fraction: f64,
}

/// In-memory state of a [`Pacemaker`].
struct PacemakerState {
    /// Timeout that the next view will be entered with.
    timeout: Duration,

    /// Phase of the current view.
    phase: ViewPhase,

    /// `TimeoutVoteCollector` for the current view.
    timeout_votes: TimeoutVoteCollector,
}

/// Enumerates the different ways a call to any of [`Pacemaker`]'s methods can fail.
#[derive(Debug)]
pub enum PacemakerError {
    /// See: [`UpdateViewError`].
    UpdateViewError(UpdateViewError),
}

impl From<UpdateViewError> for PacemakerError {
    fn from(value: UpdateViewError) -> Self {
        PacemakerError::UpdateViewError(value)
    }
}

/// Enumerates the different ways a [`Pacemaker::update_view`] call can fail.
#[derive(Debug)]
pub enum UpdateViewError {
    /// An attempt was made to update the current view to a lower view. This violates the invariant that views
    /// must be monotonically increasing.
    NonIncreasingViewError {
        /// The current view.
        cur_view: ViewNumber,

        /// The lower view that the caller tried to change the current view to.
        next_view: ViewNumber,
    },
}

/// Describes a view (most often the current view), in terms of its view number, when it was entered,
/// and its view deadline (the instant in time in which the view should end if no progress was made).
#[derive(PartialEq, Eq, Clone, Debug)]
pub(crate) struct ViewInfo {
    pub(crate) view: ViewNumber,
    pub(crate) entered: Instant,
    pub(crate) timeout: Duration,
    pub(crate) deadline: Instant,
}

impl ViewInfo {
    /// Create a new `ViewInfo` for `view`, entered at `entered` with `timeout`.
    pub(crate) fn new(view: ViewNumber, entered: Instant, timeout: Duration) -> Self {
        Self {
            view,
            entered,
            timeout,
            deadline: entered + timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        networking::messages::Message,
        types::{
            committee::Identity,
            crypto_primitives::{Ed25519Verifier, SigningKey},
            data_types::{Power, SignatureSet},
        },
    };
    use std::sync::mpsc::{self, Receiver};

    #[derive(Clone)]
    struct RecordingNetwork(Sender<Message>);

    impl Network for RecordingNetwork {
        fn broadcast(&mut self, message: Message) {
            let _ = self.0.send(message);
        }

        fn send(&mut self, _: ParticipantId, message: Message) {
            let _ = self.0.send(message);
        }

        fn recv(&mut self) -> Option<(ParticipantId, Message)> {
            None
        }
    }

    fn config() -> PacemakerConfiguration {
        PacemakerConfiguration {
            threshold_fraction: ThresholdFraction::two_thirds(),
            initial_view_timeout: Duration::from_millis(1000),
            min_view_timeout: Duration::from_millis(250),
            max_view_timeout: Duration::from_millis(3000),
            timeout_increase_factor: 2.0,
            timeout_decrease_factor: 0.5,
            proposal_delay_fraction: 0.1,
        }
    }

    fn setup() -> (Pacemaker<RecordingNetwork>, Receiver<Message>, Vec<Keypair>, Arc<Committee>) {
        setup_with(config())
    }

    fn setup_with(
        config: PacemakerConfiguration,
    ) -> (Pacemaker<RecordingNetwork>, Receiver<Message>, Vec<Keypair>, Arc<Committee>) {
        let keypairs: Vec<Keypair> = (1..=4)
            .map(|i| Keypair::new(SigningKey::from_bytes(&[i; 32])))
            .collect();
        let committee = Arc::new(
            Committee::new(keypairs.iter().map(|keypair| {
                Identity::new(keypair.id(), Power::new(25), keypair.public_key_bytes())
            }))
            .unwrap(),
        );
        let (sender, receiver) = mpsc::channel();
        let pacemaker = Pacemaker::new(
            config,
            SenderHandle::new(RecordingNetwork(sender)),
            ViewNumber::new(1),
            committee.clone(),
            None,
        );
        (pacemaker, receiver, keypairs, committee)
    }

    fn qc(view: u64) -> QuorumCertificate {
        QuorumCertificate {
            view: ViewNumber::new(view),
            block: crate::types::data_types::CryptoHash::new([view as u8; 32]),
            signatures: SignatureSet::new(4),
        }
    }

    #[test]
    fn timeout_grows_on_timeout_and_shrinks_on_progress() {
        let (mut pacemaker, _receiver, keypairs, committee) = setup();
        assert_eq!(pacemaker.current_timeout(), Duration::from_millis(1000));

        assert!(pacemaker.on_view_timeout(ViewNumber::new(1), &keypairs[0], &committee));
        assert_eq!(pacemaker.current_timeout(), Duration::from_millis(2000));
        assert!(pacemaker.on_view_timeout(ViewNumber::new(1), &keypairs[0], &committee));
        assert_eq!(pacemaker.current_timeout(), Duration::from_millis(3000));
        assert_eq!(pacemaker.phase(ViewNumber::new(1)), ViewPhase::AwaitingCertificate);

        assert!(pacemaker.on_qc(&qc(1), committee.clone()).unwrap());
        assert_eq!(pacemaker.query().view, ViewNumber::new(2));
        assert_eq!(pacemaker.current_timeout(), Duration::from_millis(1500));
        assert_eq!(pacemaker.query().timeout, Duration::from_millis(1500));

        for view in 2..6 {
            assert!(pacemaker.on_qc(&qc(view), committee.clone()).unwrap());
        }
        assert_eq!(pacemaker.current_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn oversized_timeout_growth_saturates_at_the_maximum() {
        let (mut pacemaker, _receiver, keypairs, committee) = setup_with(PacemakerConfiguration {
            timeout_increase_factor: f64::INFINITY,
            ..config()
        });

        assert!(pacemaker.on_view_timeout(ViewNumber::new(1), &keypairs[0], &committee));
        assert_eq!(pacemaker.current_timeout(), Duration::from_millis(3000));
    }

    #[test]
    fn stale_timer_is_a_no_op() {
        let (mut pacemaker, receiver, keypairs, committee) = setup();
        assert!(pacemaker.on_qc(&qc(1), committee.clone()).unwrap());
        let timeout = pacemaker.current_timeout();

        assert!(!pacemaker.on_view_timeout(ViewNumber::new(1), &keypairs[0], &committee));
        assert_eq!(pacemaker.current_timeout(), timeout);
        assert_eq!(pacemaker.phase(ViewNumber::new(1)), ViewPhase::Advanced);
        assert_eq!(pacemaker.phase(ViewNumber::new(2)), ViewPhase::AwaitingProposal);
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn certificates_for_old_views_do_not_move_the_view() {
        let (mut pacemaker, _receiver, _keypairs, committee) = setup();
        assert!(pacemaker.on_qc(&qc(4), committee.clone()).unwrap());
        assert_eq!(pacemaker.query().view, ViewNumber::new(5));
        assert!(!pacemaker.on_qc(&qc(3), committee.clone()).unwrap());
        assert_eq!(pacemaker.query().view, ViewNumber::new(5));
    }

    #[test]
    fn timeout_votes_form_a_certificate_once() {
        let (mut pacemaker, receiver, keypairs, committee) = setup();

        assert!(pacemaker.on_view_timeout(ViewNumber::new(1), &keypairs[0], &committee));
        match receiver.try_recv() {
            Ok(Message::PacemakerMessage(PacemakerMessage::TimeoutVote(vote))) => {
                assert_eq!(vote.view, ViewNumber::new(1));
                assert_eq!(vote.signer, keypairs[0].id());
            }
            _ => panic!("expected a broadcast timeout vote"),
        }

        let mut certificates = Vec::new();
        for keypair in &keypairs {
            let vote = TimeoutVote::new(keypair, ViewNumber::new(1));
            // Every vote is delivered twice.
            for _ in 0..2 {
                if let Some(tc) =
                    pacemaker.on_receive_timeout_vote(vote.clone(), &keypair.id(), &Ed25519Verifier)
                {
                    certificates.push(tc);
                }
            }
        }

        assert_eq!(certificates.len(), 1);
        assert_eq!(certificates[0].signatures.count(), 3);
        assert!(certificates[0].is_correct(&committee, ThresholdFraction::two_thirds(), &Ed25519Verifier));

        assert!(pacemaker.on_tc(&certificates[0], committee.clone()).unwrap());
        assert_eq!(pacemaker.query().view, ViewNumber::new(2));
        assert_eq!(pacemaker.current_timeout(), Duration::from_millis(2000));
    }

    #[test]
    fn certificate_before_local_timeout_shrinks_the_timeout() {
        let (mut pacemaker, receiver, keypairs, committee) = setup();

        // The other replicas time out while this replica's own timer is still running.
        let mut certificate = None;
        for keypair in &keypairs[1..] {
            let vote = TimeoutVote::new(keypair, ViewNumber::new(1));
            if let Some(tc) =
                pacemaker.on_receive_timeout_vote(vote, &keypair.id(), &Ed25519Verifier)
            {
                certificate = Some(tc);
            }
        }
        let certificate = certificate.expect("three of four timeout votes form a certificate");
        assert_eq!(pacemaker.phase(ViewNumber::new(1)), ViewPhase::AwaitingProposal);

        assert!(pacemaker.on_tc(&certificate, committee.clone()).unwrap());
        assert_eq!(pacemaker.query().view, ViewNumber::new(2));
        assert_eq!(pacemaker.current_timeout(), Duration::from_millis(500));
        assert_eq!(pacemaker.query().timeout, Duration::from_millis(500));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn timeout_votes_for_other_views_are_ignored() {
        let (mut pacemaker, _receiver, keypairs, _committee) = setup();
        for keypair in &keypairs {
            let vote = TimeoutVote::new(keypair, ViewNumber::new(7));
            assert!(pacemaker
                .on_receive_timeout_vote(vote, &keypair.id(), &Ed25519Verifier)
                .is_none());
        }
    }

    #[test]
    fn proposal_delay_is_a_fraction_of_the_view_timeout() {
        let (pacemaker, _receiver, _keypairs, _committee) = setup();
        assert_eq!(pacemaker.proposal_delay(), Duration::from_millis(100));
    }
}
