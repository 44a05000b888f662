//! [`Node`], a running replica together with the state that integration tests inspect.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use hotstuff_quorum::{
    events::{CollectQCEvent, CollectTCEvent, StartViewEvent, ViewTimeoutEvent},
    pacemaker::messages::ProgressCertificate,
    replica::{Configuration, Replica, ReplicaSpec},
    types::{
        committee::EpochCommittees,
        crypto_primitives::{Ed25519Verifier, Keypair, SigningKey},
        data_types::{EpochSeed, ParticipantId, ViewNumber},
    },
};

use crate::common::{logging::log_with_context, network::NetworkStub, number_app::NumberApp};

pub(crate) struct Node {
    id: ParticipantId,
    // Kept alive for as long as the node is.
    #[allow(dead_code)]
    replica: Replica,
    certificates: Arc<Mutex<Vec<ProgressCertificate>>>,
    highest_view_entered: Arc<Mutex<ViewNumber>>,
}

impl Node {
    pub(crate) fn new(signing_key: SigningKey, network: NetworkStub, committees: EpochCommittees) -> Node {
        let id = Keypair::new(signing_key.clone()).id();
        let certificates = Arc::new(Mutex::new(Vec::new()));
        let highest_view_entered = Arc::new(Mutex::new(ViewNumber::init()));

        let configuration = Configuration::builder()
            .me(signing_key)
            .epoch_seed(EpochSeed::new([42; 32]))
            .leader_horizon(1000)
            .initial_view_timeout(Duration::from_millis(1000))
            .min_view_timeout(Duration::from_millis(500))
            .max_view_timeout(Duration::from_millis(4000))
            .log_events(false)
            .build();

        let replica = ReplicaSpec::builder()
            .app(NumberApp::new(certificates.clone()))
            .network(network)
            .committees(committees)
            .verifier(Ed25519Verifier)
            .configuration(configuration)
            .on_start_view(start_view_handler(id, highest_view_entered.clone()))
            .on_view_timeout(view_timeout_handler(id))
            .on_collect_qc(collect_qc_handler(id))
            .on_collect_tc(collect_tc_handler(id))
            .build()
            .start()
            .expect("The initial committee must be available");

        Node {
            id,
            replica,
            certificates,
            highest_view_entered,
        }
    }

    pub(crate) fn id(&self) -> ParticipantId {
        self.id
    }

    /// Number of quorum certificates that this node's app has been told about.
    pub(crate) fn quorum_certificates_seen(&self) -> usize {
        self.certificates
            .lock()
            .unwrap()
            .iter()
            .filter(|certificate| matches!(certificate, ProgressCertificate::QuorumCertificate(_)))
            .count()
    }

    pub(crate) fn highest_view_entered(&self) -> ViewNumber {
        *self.highest_view_entered.lock().unwrap()
    }
}

fn start_view_handler(
    id: ParticipantId,
    highest_view_entered: Arc<Mutex<ViewNumber>>,
) -> impl Fn(&StartViewEvent) + Send + 'static {
    move |start_view_event| {
        let mut highest = highest_view_entered.lock().unwrap();
        if start_view_event.view > *highest {
            *highest = start_view_event.view;
        }
        log_with_context(
            Some(id),
            &format!(
                "Started View, view: {}, timeout: {:?}",
                start_view_event.view, start_view_event.timeout
            ),
        );
    }
}

fn view_timeout_handler(id: ParticipantId) -> impl Fn(&ViewTimeoutEvent) + Send + 'static {
    move |view_timeout_event| {
        log_with_context(
            Some(id),
            &format!("View Timed Out, view: {}", view_timeout_event.view),
        );
    }
}

fn collect_qc_handler(id: ParticipantId) -> impl Fn(&CollectQCEvent) + Send + 'static {
    move |collect_qc_event| {
        log_with_context(
            Some(id),
            &format!(
                "Collected QC, view: {}, signatures: {}",
                collect_qc_event.quorum_certificate.view,
                collect_qc_event.quorum_certificate.signatures.count()
            ),
        );
    }
}

fn collect_tc_handler(id: ParticipantId) -> impl Fn(&CollectTCEvent) + Send + 'static {
    move |collect_tc_event| {
        log_with_context(
            Some(id),
            &format!("Collected TC, view: {}", collect_tc_event.timeout_certificate.view),
        );
    }
}
