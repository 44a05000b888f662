/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a replica.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the replica](ReplicaSpec) with:
//!   1. `ReplicaSpec::builder` to construct a `ReplicaSpecBuilder`,
//!   2. The setters of the `ReplicaSpecBuilder`, and
//!   3. The `ReplicaSpecBuilder::build` method to construct a [ReplicaSpec],
//! - The function to [start](ReplicaSpec::start) a [Replica] given its specification,
//! - [The type](Replica) which keeps the replica alive.
//!
//! ## Starting a replica
//!
//! Here is an example that demonstrates how to build and start running a replica using the builder
//! pattern:
//!
//! ```ignore
//! let replica =
//!     ReplicaSpec::builder()
//!     .app(app)
//!     .network(network)
//!     .committees(committees)
//!     .verifier(Ed25519Verifier)
//!     .configuration(configuration)
//!     .on_collect_qc(collect_qc_handler)
//!     .build()
//!     .start()
//! ```
//!
//! ### Required setters
//!
//! The required setters are for providing the trait implementations required to run a replica:
//! - `.app(...)`
//! - `.network(...)`
//! - `.committees(...)`
//! - `.verifier(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! The optional setters are for registering user-defined event handlers for events from
//! [crate::events]:
//! - `.on_propose(...)`
//! - `.on_vote(...)`
//! - `.on_timeout_vote(...)`
//! - `.on_advance_view(...)`
//! - `.on_receive_proposal(...)`
//! - `.on_receive_vote(...)`
//! - `.on_receive_timeout_vote(...)`
//! - `.on_receive_advance_view(...)`
//! - `.on_start_view(...)`
//! - `.on_view_timeout(...)`
//! - `.on_collect_qc(...)`
//! - `.on_collect_tc(...)`
//! - `.on_prune_votes(...)`
//!
//! The replica's [configuration](Configuration) can also be defined using the builder pattern, for
//! example:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .me(keypair)
//!     .epoch_seed(EpochSeed::new([0; 32]))
//!     .initial_view_timeout(Duration::from_secs(2))
//!     .min_view_timeout(Duration::from_millis(500))
//!     .max_view_timeout(Duration::from_secs(30))
//!     .log_events(true)
//!     .build()
//! ```

use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::algorithm::Algorithm;
use crate::app::App;
use crate::event_bus::*;
use crate::events::*;
use crate::leader_selection::implementation::DEFAULT_LEADER_HORIZON;
use crate::leader_selection::{HorizonPolicy, LeaderSelector, LeaderSelectorConfiguration};
use crate::networking::network::Network;
use crate::networking::sending::SenderHandle;
use crate::pacemaker::implementation::{Pacemaker, PacemakerConfiguration};
use crate::types::committee::{CommitteeError, CommitteeProvider};
use crate::types::crypto_primitives::{Keypair, SignatureVerifier, SigningKey};
use crate::types::data_types::{EpochSeed, ThresholdFraction, ViewNumber};
use crate::vote_aggregator::{AggregatorConfiguration, VoteAggregator, DEFAULT_PENDING_VOTE_WINDOW};

/// Stores the user-defined parameters required to start the replica, that is:
/// 1. The replica's [keypair](SigningKey).
/// 2. The [threshold fraction](ThresholdFraction) of stake that certificates must exceed, and how
///    many views ahead votes for unknown blocks are kept.
/// 3. The [epoch seed](EpochSeed) that the leader schedule is derived from.
/// 4. The leader schedule horizon and what happens beyond it.
/// 5. The bounds and adjustment factors of the adaptive view timeout.
/// 6. The fraction of the view timeout that leaders wait before proposing.
/// 7. The "Log Events" flag, if set to "true" then logs should be printed.
///
/// ## View timeouts
///
/// `min_view_timeout <= initial_view_timeout <= max_view_timeout` should hold. An initial timeout
/// outside the bounds is clamped into them, but inverted bounds or a NaN factor or fraction make
/// [`ReplicaSpec::start`] fail with [`StartReplicaError::InvalidConfiguration`]. Factors and
/// fractions out of range are clamped.
///
/// ## Log Events
///
/// This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`
    - `.epoch_seed(...)`
    - `.initial_view_timeout(...)`
    - `.min_view_timeout(...)`
    - `.max_view_timeout(...)`
    - `.log_events(...)`

    Optional:
    - `.threshold_fraction(...)`
    - `.pending_vote_window(...)`
    - `.leader_horizon(...)`
    - `.horizon_policy(...)`
    - `.timeout_increase_factor(...)`
    - `.timeout_decrease_factor(...)`
    - `.proposal_delay_fraction(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the replica's keypair, used to sign votes. Required."))]
    pub me: SigningKey,
    #[builder(
        default,
        setter(doc = "Set the fraction of stake that certificates must exceed. Optional, defaults to two-thirds.")
    )]
    pub threshold_fraction: ThresholdFraction,
    #[builder(
        default = DEFAULT_PENDING_VOTE_WINDOW,
        setter(doc = "Set how many views ahead of the current view votes for unknown blocks are kept. Optional, defaults to 1000.")
    )]
    pub pending_vote_window: u64,
    #[builder(setter(doc = "Set the randomness that the leader schedule is derived from. Required."))]
    pub epoch_seed: EpochSeed,
    #[builder(
        default,
        setter(
            strip_option,
            doc = "Set the number of views in the leader schedule. Optional, defaults to six 30-day months of one-second views."
        )
    )]
    pub leader_horizon: Option<u64>,
    #[builder(
        default = HorizonPolicy::Extend,
        setter(doc = "Set what happens when the leader of a view beyond the horizon is requested. Optional, defaults to extending the schedule.")
    )]
    pub horizon_policy: HorizonPolicy,
    #[builder(setter(doc = "Set the timeout of the first view. Required."))]
    pub initial_view_timeout: Duration,
    #[builder(setter(doc = "Set the lower bound on view timeouts. Required."))]
    pub min_view_timeout: Duration,
    #[builder(setter(doc = "Set the upper bound on view timeouts. Required."))]
    pub max_view_timeout: Duration,
    #[builder(
        default = 2.0,
        setter(doc = "Set the factor that the view timeout grows by after a timeout. Optional, defaults to 2.")
    )]
    pub timeout_increase_factor: f64,
    #[builder(
        default = 0.8,
        setter(doc = "Set the factor that the view timeout shrinks by after a view ends before timing out. Optional, defaults to 0.8.")
    )]
    pub timeout_decrease_factor: f64,
    #[builder(
        default = 0.1,
        setter(doc = "Set the fraction of the view timeout that leaders wait before proposing. Optional, defaults to 0.1.")
    )]
    pub proposal_delay_fraction: f64,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

impl Configuration {
    /// Check the parameters that cannot be corrected by clamping them into range.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.min_view_timeout > self.max_view_timeout {
            return Err(ConfigurationError::InvertedTimeoutBounds {
                min_view_timeout: self.min_view_timeout,
                max_view_timeout: self.max_view_timeout,
            });
        }

        for (parameter, value) in [
            ("timeout_increase_factor", self.timeout_increase_factor),
            ("timeout_decrease_factor", self.timeout_decrease_factor),
            ("proposal_delay_fraction", self.proposal_delay_fraction),
        ] {
            if value.is_nan() {
                return Err(ConfigurationError::NotANumber { parameter });
            }
        }

        Ok(())
    }
}

#[allow(clippy::from_over_into)]
impl Into<(Keypair, AggregatorConfiguration, PacemakerConfiguration, LeaderSelectorConfiguration)>
    for Configuration
{
    fn into(
        self,
    ) -> (
        Keypair,
        AggregatorConfiguration,
        PacemakerConfiguration,
        LeaderSelectorConfiguration,
    ) {
        let keypair = Keypair::new(self.me);
        let aggregator_config = AggregatorConfiguration {
            threshold_fraction: self.threshold_fraction,
            pending_vote_window: self.pending_vote_window,
        };
        let pacemaker_config = PacemakerConfiguration {
            threshold_fraction: self.threshold_fraction,
            initial_view_timeout: self.initial_view_timeout,
            min_view_timeout: self.min_view_timeout,
            max_view_timeout: self.max_view_timeout,
            timeout_increase_factor: self.timeout_increase_factor.max(1.0),
            timeout_decrease_factor: self.timeout_decrease_factor.clamp(0.0, 1.0),
            proposal_delay_fraction: self.proposal_delay_fraction.clamp(0.0, 1.0),
        };
        let leader_selector_config = LeaderSelectorConfiguration {
            seed: self.epoch_seed,
            horizon: self.leader_horizon.unwrap_or(DEFAULT_LEADER_HORIZON),
            policy: self.horizon_policy,
        };
        (
            keypair,
            aggregator_config,
            pacemaker_config,
            leader_selector_config,
        )
    }
}

/// Stores all necessary parameters and trait implementations required to run the [Replica].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ReplicaSpec]. On the builder call the following methods to construct a valid [ReplicaSpec].

    Required:
    - `.app(...)`
    - `.network(...)`
    - `.committees(...)`
    - `.verifier(...)`
    - `.configuration(...)`

    Optional:
    - `.on_propose(...)`
    - `.on_vote(...)`
    - `.on_timeout_vote(...)`
    - `.on_advance_view(...)`
    - `.on_receive_proposal(...)`
    - `.on_receive_vote(...)`
    - `.on_receive_timeout_vote(...)`
    - `.on_receive_advance_view(...)`
    - `.on_start_view(...)`
    - `.on_view_timeout(...)`
    - `.on_collect_qc(...)`
    - `.on_collect_tc(...)`
    - `.on_prune_votes(...)`
"))]
pub struct ReplicaSpec<A, N, P, V>
where
    A: App + 'static,
    N: Network + 'static,
    P: CommitteeProvider + 'static,
    V: SignatureVerifier + Clone + 'static,
{
    // Required parameters
    #[builder(setter(doc = "Set the application that blocks are produced and judged by. The argument must implement the [App](crate::app::App) trait. Required."))]
    app: A,
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::network::Network) trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the source of the committee of every view. The argument must implement the [CommitteeProvider](crate::types::committee::CommitteeProvider) trait. Required."))]
    committees: P,
    #[builder(setter(doc = "Set the signature verification capability. Required."))]
    verifier: V,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a replica. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposeEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a proposal for a block. Optional."))]
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&VoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<VoteEvent>),
    doc = "Register a handler closure to be invoked after the replica sends a vote. Optional."))]
    on_vote: Option<HandlerPtr<VoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&TimeoutVoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<TimeoutVoteEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a timeout vote. Optional."))]
    on_timeout_vote: Option<HandlerPtr<TimeoutVoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&AdvanceViewEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AdvanceViewEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts an advance view message. Optional."))]
    on_advance_view: Option<HandlerPtr<AdvanceViewEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveProposalEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveProposalEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a proposal for a block. Optional."))]
    on_receive_proposal: Option<HandlerPtr<ReceiveProposalEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveVoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveVoteEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a vote. Optional."))]
    on_receive_vote: Option<HandlerPtr<ReceiveVoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveTimeoutVoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveTimeoutVoteEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a timeout vote. Optional."))]
    on_receive_timeout_vote: Option<HandlerPtr<ReceiveTimeoutVoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveAdvanceViewEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveAdvanceViewEvent>),
    doc = "Register a handler closure to be invoked after the replica receives an advance view message. Optional."))]
    on_receive_advance_view: Option<HandlerPtr<ReceiveAdvanceViewEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartViewEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartViewEvent>),
    doc = "Register a handler closure to be invoked after the replica enters a new view. Optional."))]
    on_start_view: Option<HandlerPtr<StartViewEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ViewTimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ViewTimeoutEvent>),
    doc = "Register a handler closure to be invoked after the replica's view times out. Optional."))]
    on_view_timeout: Option<HandlerPtr<ViewTimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CollectQCEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CollectQCEvent>),
    doc = "Register a handler closure to be invoked after the replica collects a new quorum certificate. Optional."))]
    on_collect_qc: Option<HandlerPtr<CollectQCEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CollectTCEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CollectTCEvent>),
    doc = "Register a handler closure to be invoked after the replica collects a new timeout certificate. Optional."))]
    on_collect_tc: Option<HandlerPtr<CollectTCEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PruneVotesEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PruneVotesEvent>),
    doc = "Register a handler closure to be invoked after the replica prunes votes of past views. Optional."))]
    on_prune_votes: Option<HandlerPtr<PruneVotesEvent>>,
}

impl<A, N, P, V> ReplicaSpec<A, N, P, V>
where
    A: App + 'static,
    N: Network + 'static,
    P: CommitteeProvider + 'static,
    V: SignatureVerifier + Clone + 'static,
{
    /// Starts all threads and channels associated with running a replica, and returns the handles to
    /// them in a [Replica] struct.
    pub fn start(self) -> Result<Replica, StartReplicaError> {
        self.configuration.validate()?;
        let log_events = self.configuration.log_events;
        let (keypair, aggregator_config, pacemaker_config, leader_selector_config) =
            self.configuration.into();

        let init_view = ViewNumber::init();
        let committees = Arc::new(self.committees);
        let init_committee = committees
            .committee_at_view(init_view)
            .map_err(StartReplicaError::NoInitialCommittee)?;

        let event_handlers = EventHandlers::new(
            log_events,
            self.on_propose,
            self.on_vote,
            self.on_timeout_vote,
            self.on_advance_view,
            self.on_receive_proposal,
            self.on_receive_vote,
            self.on_receive_timeout_vote,
            self.on_receive_advance_view,
            self.on_start_view,
            self.on_view_timeout,
            self.on_collect_qc,
            self.on_collect_tc,
            self.on_prune_votes,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let leader_selector = Arc::new(LeaderSelector::new(
            leader_selector_config,
            init_view,
            init_committee.clone(),
        ));
        let vote_aggregator = Arc::new(VoteAggregator::new(
            aggregator_config,
            committees.clone(),
            self.verifier.clone(),
        ));
        let pacemaker = Pacemaker::new(
            pacemaker_config,
            SenderHandle::new(self.network.clone()),
            init_view,
            init_committee,
            event_publisher.clone(),
        );

        let (algorithm_shutdown, algorithm_shutdown_receiver) = mpsc::channel();
        let algorithm = Algorithm::new(
            keypair,
            self.app,
            self.network,
            committees,
            self.verifier,
            aggregator_config.threshold_fraction,
            leader_selector,
            vote_aggregator,
            pacemaker,
            algorithm_shutdown_receiver,
            event_publisher,
        );
        let algorithm = algorithm.start();

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                let event_bus =
                    start_event_bus(event_handlers, event_subscriber, event_bus_shutdown_receiver);
                (Some(event_bus), Some(event_bus_shutdown))
            }
            None => (None, None),
        };

        Ok(Replica {
            algorithm: Some(algorithm),
            algorithm_shutdown,
            event_bus,
            event_bus_shutdown,
        })
    }
}

/// A handle to the background threads of a replica. When this value is dropped, all background threads
/// are gracefully shut down.
pub struct Replica {
    algorithm: Option<JoinHandle<()>>,
    algorithm_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl Drop for Replica {
    fn drop(&mut self) {
        // The algorithm thread publishes to the event bus, so it must stop first.
        let _ = self.algorithm_shutdown.send(());
        if let Some(algorithm) = self.algorithm.take() {
            let _ = algorithm.join();
        }

        if let Some(shutdown) = &self.event_bus_shutdown {
            let _ = shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }
    }
}

/// Enumerates the ways [`ReplicaSpec::start`] can fail.
#[derive(Debug)]
pub enum StartReplicaError {
    /// See: [`ConfigurationError`].
    InvalidConfiguration(ConfigurationError),

    /// The committee provider has no committee for the first view.
    NoInitialCommittee(CommitteeError),
}

impl From<ConfigurationError> for StartReplicaError {
    fn from(value: ConfigurationError) -> Self {
        StartReplicaError::InvalidConfiguration(value)
    }
}

/// Enumerates the ways a [`Configuration`] can be invalid.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// `min_view_timeout` is greater than `max_view_timeout`.
    InvertedTimeoutBounds {
        min_view_timeout: Duration,
        max_view_timeout: Duration,
    },

    /// A factor or fraction is NaN.
    NotANumber { parameter: &'static str },
}
