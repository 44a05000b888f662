/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that store information about the stake-weighted set of participants that vote in a view.
//!
//! A [`Committee`] is an immutable snapshot. Components never hold onto a committee beyond the operation
//! they need it for; instead, they ask a [`CommitteeProvider`] for the committee of the view they are
//! working on.

use std::{
    collections::BTreeMap,
    slice,
    sync::Arc,
};

use borsh::{BorshDeserialize, BorshSerialize};

use super::data_types::{ParticipantId, Power, PublicKeyBytes, ThresholdFraction, TotalPower, ViewNumber};

/// A participant in consensus: who it is, how much stake it has, and the key material its signatures
/// are checked against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Identity {
    pub id: ParticipantId,
    pub stake: Power,
    pub public_key: PublicKeyBytes,
}

impl Identity {
    pub fn new(id: ParticipantId, stake: Power, public_key: PublicKeyBytes) -> Self {
        Self {
            id,
            stake,
            public_key,
        }
    }
}

/// Stores the identities of the participants eligible to vote in a view, together with their stakes.
///
/// ## Ordering of participants
///
/// `Committee` internally maintains the list of identities in ascending order of their
/// [`ParticipantId`]s. The [`position`](Committee::position) of a participant in this order is its
/// "signer index", which is the position its signature occupies in a
/// [`SignatureSet`](super::data_types::SignatureSet).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Committee {
    identities: Vec<Identity>,
    total_stake: TotalPower,
}

impl Committee {
    /// Create a committee out of `identities`, in any order.
    ///
    /// # Errors
    ///
    /// Fails if `identities` is empty, contains the same participant twice, or has zero total stake.
    pub fn new(identities: impl IntoIterator<Item = Identity>) -> Result<Committee, CommitteeError> {
        let mut identities: Vec<Identity> = identities.into_iter().collect();
        if identities.is_empty() {
            return Err(CommitteeError::EmptyCommittee);
        }

        identities.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(pair) = identities.windows(2).find(|pair| pair[0].id == pair[1].id) {
            return Err(CommitteeError::DuplicateParticipant { id: pair[0].id });
        }

        let mut total_stake = TotalPower::new(0);
        for identity in &identities {
            total_stake += identity.stake
        }
        if total_stake.int() == 0 {
            return Err(CommitteeError::ZeroTotalStake);
        }

        Ok(Self {
            identities,
            total_stake,
        })
    }

    /// Get the position of `id` in the [ordering of participants](Self#ordering-of-participants).
    pub fn position(&self, id: &ParticipantId) -> Option<usize> {
        self.identities
            .binary_search_by(|identity| identity.id.cmp(id))
            .ok()
    }

    /// Get the identity of the participant identified by `id`.
    pub fn identity(&self, id: &ParticipantId) -> Option<&Identity> {
        self.position(id).map(|pos| &self.identities[pos])
    }

    /// Get the identity at position `pos`.
    pub fn identity_at(&self, pos: usize) -> Option<&Identity> {
        self.identities.get(pos)
    }

    /// Get the stake of the participant identified by `id`.
    pub fn stake(&self, id: &ParticipantId) -> Option<Power> {
        self.identity(id).map(|identity| identity.stake)
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.position(id).is_some()
    }

    /// Get the sum of the stakes of all of the participants in the committee.
    pub fn total_stake(&self) -> TotalPower {
        self.total_stake
    }

    /// Get the minimum stake that a certificate formed in this committee must carry.
    pub fn threshold(&self, fraction: ThresholdFraction) -> TotalPower {
        fraction.threshold(self.total_stake)
    }

    /// Iterate through the identities in ascending order of their ids.
    pub fn iter(&self) -> slice::Iter<'_, Identity> {
        self.identities.iter()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

/// Source of the committee snapshot that is in effect at any view.
///
/// Implementations must be stable: once a committee is returned for a view, every later call for the
/// same view must return an equal committee. Historical views must remain queryable for at least as
/// long as votes for them can still arrive.
pub trait CommitteeProvider: Send + Sync {
    fn committee_at_view(&self, view: ViewNumber) -> Result<Arc<Committee>, CommitteeError>;
}

impl<P: CommitteeProvider + ?Sized> CommitteeProvider for Arc<P> {
    fn committee_at_view(&self, view: ViewNumber) -> Result<Arc<Committee>, CommitteeError> {
        (**self).committee_at_view(view)
    }
}

/// A [`CommitteeProvider`] over a fixed sequence of epochs. Every epoch is identified by the first view
/// it covers, and lasts until the next epoch starts.
#[derive(Clone, Debug)]
pub struct EpochCommittees {
    epochs: BTreeMap<ViewNumber, Arc<Committee>>,
}

impl EpochCommittees {
    /// Create an `EpochCommittees` whose first epoch starts at the initial view.
    pub fn new(initial: Committee) -> Self {
        let mut epochs = BTreeMap::new();
        epochs.insert(ViewNumber::init(), Arc::new(initial));
        Self { epochs }
    }

    /// Schedule `committee` to take effect starting from `start_view`.
    ///
    /// # Errors
    ///
    /// `start_view` must be later than the start of every epoch already scheduled.
    pub fn push_epoch(&mut self, start_view: ViewNumber, committee: Committee) -> Result<(), CommitteeError> {
        if let Some(last_start) = self.epochs.keys().next_back() {
            if start_view <= *last_start {
                return Err(CommitteeError::NonIncreasingEpochStart {
                    last_start: *last_start,
                    start_view,
                });
            }
        }
        self.epochs.insert(start_view, Arc::new(committee));
        Ok(())
    }
}

impl CommitteeProvider for EpochCommittees {
    fn committee_at_view(&self, view: ViewNumber) -> Result<Arc<Committee>, CommitteeError> {
        self.epochs
            .range(..=view)
            .next_back()
            .map(|(_, committee)| committee.clone())
            .ok_or(CommitteeError::NoCommitteeForView { view })
    }
}

/// Enumerates the ways in which building or looking up a committee can fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitteeError {
    EmptyCommittee,
    ZeroTotalStake,
    DuplicateParticipant {
        id: ParticipantId,
    },
    NoCommitteeForView {
        view: ViewNumber,
    },
    NonIncreasingEpochStart {
        last_start: ViewNumber,
        start_view: ViewNumber,
    },
}
