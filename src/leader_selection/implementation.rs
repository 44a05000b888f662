/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Precomputed, seeded leader schedule.
//!
//! Main type: [`LeaderSelector`].

use std::{
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use crate::types::{
    committee::{Committee, Identity},
    crypto_primitives::{CryptoHasher, Digest},
    data_types::{EpochSeed, ParticipantId, ViewNumber},
};

/// Maps views to leaders for one epoch.
///
/// On construction, the leaders of the first [`horizon`](LeaderSelectorConfiguration::horizon) views
/// of the epoch are computed and cached, up to [`MAX_PRECOMPUTED_VIEWS`] of them. The rest of the
/// horizon is computed when first asked for. What happens beyond the horizon is decided by the
/// configured [`HorizonPolicy`].
///
/// Two `LeaderSelector`s created from the same seed, committee, and first view agree on the leader of
/// every view, whatever their horizons.
pub struct LeaderSelector {
    config: LeaderSelectorConfiguration,
    committee: Arc<Committee>,
    first_view: ViewNumber,
    // Positions in `committee` of the leaders of `first_view`, `first_view + 1`, and so on.
    schedule: RwLock<Vec<u32>>,
}

impl LeaderSelector {
    /// Create a `LeaderSelector` for the epoch that starts at `first_view` and is voted in by
    /// `committee`.
    pub fn new(
        config: LeaderSelectorConfiguration,
        first_view: ViewNumber,
        committee: Arc<Committee>,
    ) -> Self {
        let schedule = (0..config.horizon.min(MAX_PRECOMPUTED_VIEWS))
            .map(|offset| select_position(&config.seed, first_view + offset, &committee))
            .collect();
        Self {
            config,
            committee,
            first_view,
            schedule: RwLock::new(schedule),
        }
    }

    /// Get the leader of `view`.
    pub fn by_view(&self, view: ViewNumber) -> Result<ParticipantId, LeaderSelectionError> {
        if view < self.first_view {
            return Err(LeaderSelectionError::ViewBeforeEpoch {
                view,
                first_view: self.first_view,
            });
        }
        let offset = view.int() - self.first_view.int();

        {
            let schedule = self.schedule.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(position) = usize::try_from(offset).ok().and_then(|i| schedule.get(i)) {
                return Ok(self.id_at(*position));
            }
        }

        if offset >= self.config.horizon && self.config.policy == HorizonPolicy::Error {
            return Err(LeaderSelectionError::ViewBeyondHorizon {
                view,
                horizon_end: self.first_view + self.config.horizon,
            });
        }

        let mut schedule = self.schedule.write().unwrap_or_else(PoisonError::into_inner);
        // Views far beyond the cached prefix are computed on the fly rather than cached.
        if offset >= (schedule.len() as u64).saturating_add(MAX_PRECOMPUTED_VIEWS) {
            return Ok(select_leader(&self.config.seed, view, &self.committee));
        }
        while (schedule.len() as u64) <= offset {
            let next = self.first_view + schedule.len() as u64;
            schedule.push(select_position(&self.config.seed, next, &self.committee));
        }
        Ok(self.id_at(schedule[offset as usize]))
    }

    /// Get the identity of the participant identified by `id`.
    pub fn by_identifier(&self, id: &ParticipantId) -> Result<Identity, LeaderSelectionError> {
        self.committee
            .identity(id)
            .copied()
            .ok_or(LeaderSelectionError::UnknownParticipant { id: *id })
    }

    /// Check whether `id` leads `view`.
    pub fn is_leader(&self, id: &ParticipantId, view: ViewNumber) -> Result<bool, LeaderSelectionError> {
        Ok(self.by_view(view)? == *id)
    }

    pub fn committee(&self) -> &Arc<Committee> {
        &self.committee
    }

    pub fn first_view(&self) -> ViewNumber {
        self.first_view
    }

    fn id_at(&self, position: u32) -> ParticipantId {
        self.committee.iter().as_slice()[position as usize].id
    }
}

/// Deterministically select a participant of `committee` to lead `view`, with probability proportional
/// to its stake.
///
/// The first 16 bytes of `SHA256(seed || view)` form a ticket that is reduced modulo the committee's
/// total stake. Laying the stakes of the participants out on a line in the
/// [committee's order](Committee#ordering-of-participants), the leader is the participant whose
/// stretch of the line contains the ticket.
pub fn select_leader(seed: &EpochSeed, view: ViewNumber, committee: &Committee) -> ParticipantId {
    committee.iter().as_slice()[select_position(seed, view, committee) as usize].id
}

fn select_position(seed: &EpochSeed, view: ViewNumber, committee: &Committee) -> u32 {
    let mut hasher = CryptoHasher::new();
    hasher.update(seed.bytes());
    hasher.update(view.to_le_bytes());
    let digest: [u8; 32] = hasher.finalize().into();

    let mut ticket_bytes = [0u8; 16];
    ticket_bytes.copy_from_slice(&digest[0..16]);
    let ticket = u128::from_le_bytes(ticket_bytes) % committee.total_stake().int();

    let mut cumulative: u128 = 0;
    for (position, identity) in committee.iter().enumerate() {
        cumulative += identity.stake.int() as u128;
        if ticket < cumulative {
            return position as u32;
        }
    }

    // Safety: `ticket` is less than the total stake, which is the final value of `cumulative`.
    unreachable!("Cannot select a leader: ticket beyond total stake!")
}

/// Number of views that fit into `period` if every view lasts `target_view_time`.
pub fn horizon_for(period: Duration, target_view_time: Duration) -> u64 {
    if target_view_time.is_zero() {
        return 0;
    }
    (period.as_nanos() / target_view_time.as_nanos()).min(u64::MAX as u128) as u64
}

/// Default number of views in a leader schedule: six 30-day months of one-second views.
pub const DEFAULT_LEADER_HORIZON: u64 = 6 * 30 * 24 * 60 * 60;

/// Number of views whose leaders are computed eagerly, and the most that a single lookup caches.
pub const MAX_PRECOMPUTED_VIEWS: u64 = 1 << 16;

/// What a [`LeaderSelector`] does when asked for a view beyond its precomputed horizon.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HorizonPolicy {
    /// Fail with [`LeaderSelectionError::ViewBeyondHorizon`].
    Error,

    /// Keep deriving leaders from the same seed. The result is identical to having precomputed a larger
    /// horizon.
    Extend,
}

/// Configuration variables for the [`LeaderSelector`] struct.
#[derive(Clone, Copy, Debug)]
pub struct LeaderSelectorConfiguration {
    /// Randomness that the schedule is derived from.
    pub seed: EpochSeed,

    /// Number of views to precompute the schedule for.
    pub horizon: u64,

    /// Behavior past the horizon.
    pub policy: HorizonPolicy,
}

/// Enumerates the different ways a call to any of [`LeaderSelector`]'s methods can fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaderSelectionError {
    /// The view precedes the first view of the epoch.
    ViewBeforeEpoch {
        view: ViewNumber,
        first_view: ViewNumber,
    },

    /// The view is beyond the precomputed horizon, and the policy is [`HorizonPolicy::Error`].
    ViewBeyondHorizon {
        view: ViewNumber,
        horizon_end: ViewNumber,
    },

    /// The participant is not in the epoch's committee.
    UnknownParticipant { id: ParticipantId },
}
