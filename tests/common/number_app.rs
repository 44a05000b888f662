//! [`NumberApp`], a simple implementation of [`App`] used in the replica integration tests.

use std::sync::{Arc, Mutex};

use hotstuff_quorum::{
    app::App,
    pacemaker::messages::ProgressCertificate,
    types::{
        block::Block,
        data_types::{Data, Datum, ViewNumber},
    },
    vote_aggregator::types::QuorumCertificate,
};

/// A simple implementation of [`App`] for use in integration tests.
///
/// Every block that the number app produces carries a single datum: the little-endian bytes of the
/// view it was produced in. The app votes for a block only if its `justify` is at least as recent as
/// the `justify` of every block it voted for before, and records every certificate it is told about
/// in a shared list that tests can inspect through [`NumberApp::certificates`].
pub(crate) struct NumberApp {
    locked_view: Option<ViewNumber>,
    certificates: Arc<Mutex<Vec<ProgressCertificate>>>,
}

impl NumberApp {
    /// Create a new number app that records certificates into `certificates`.
    ///
    /// Callers should clone a reference to `certificates` before calling this constructor.
    pub(crate) fn new(certificates: Arc<Mutex<Vec<ProgressCertificate>>>) -> NumberApp {
        Self {
            locked_view: None,
            certificates,
        }
    }

    /// Decode the view that a block produced by a number app was produced in.
    pub(crate) fn number(data: &Data) -> Option<u64> {
        let bytes = data.vec().first()?.bytes();
        Some(u64::from_le_bytes(bytes.as_slice().try_into().ok()?))
    }
}

impl App for NumberApp {
    fn produce_data(&mut self, view: ViewNumber, _justify: &QuorumCertificate) -> Data {
        Data::new(vec![Datum::new(view.to_le_bytes().to_vec())])
    }

    fn is_safe_to_vote(&mut self, block: &Block) -> bool {
        if NumberApp::number(&block.data) != Some(block.view.int()) {
            return false;
        }

        let justify_view = block.justify.view;
        if self.locked_view.is_some_and(|locked_view| justify_view < locked_view) {
            return false;
        }
        self.locked_view = Some(justify_view);
        true
    }

    fn on_certificate(&mut self, certificate: &ProgressCertificate) {
        self.certificates.lock().unwrap().push(certificate.clone());
    }
}
