/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash,
    ops::{Add, AddAssign},
    slice,
};

use borsh::{BorshDeserialize, BorshSerialize};

/// Round counter of the consensus protocol.
///
/// Views increase monotonically. Every view has at most one leader, and every block is proposed in
/// exactly one view.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct ViewNumber(u64);

impl ViewNumber {
    /// Create a new `ViewNumber` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the view number that a replica starts from.
    pub const fn init() -> Self {
        Self(0)
    }

    /// Get the inner `u64` value of this `ViewNumber`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Get the little-endian representation of the inner `u64` value of this `ViewNumber`.
    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Get the view that precedes this one, or `None` if this is the initial view.
    pub fn prev(&self) -> Option<ViewNumber> {
        self.0.checked_sub(1).map(ViewNumber)
    }
}

impl Display for ViewNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl AddAssign<u64> for ViewNumber {
    fn add_assign(&mut self, rhs: u64) {
        self.0.add_assign(rhs)
    }
}

impl Add<u64> for ViewNumber {
    type Output = ViewNumber;
    fn add(self, rhs: u64) -> Self::Output {
        ViewNumber::new(self.0.saturating_add(rhs))
    }
}

/// 32-byte cryptographic hash.
///
/// Block hashes are always SHA256 hashes over the block's contents (see
/// [`Block::hash`](super::block::Block#structfield.hash)). Within the vote aggregator a `CryptoHash`
/// is the only key that votes are grouped by.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "CryptoHash({})", hex(&self.0))
    }
}

/// Stable identifier of a participant in consensus.
///
/// Replicas that use the default Ed25519 signer identify themselves by the bytes of their verifying
/// key, but nothing in the aggregation logic relies on that.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct ParticipantId([u8; 32]);

impl ParticipantId {
    /// Create a new `ParticipantId` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `ParticipantId`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Debug for ParticipantId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ParticipantId({})", hex(&self.0[0..4]))
    }
}

/// Opaque public-key material of a participant. Only a
/// [`SignatureVerifier`](super::crypto_primitives::SignatureVerifier) gives it meaning.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct PublicKeyBytes([u8; 32]);

impl PublicKeyBytes {
    /// Create a new `PublicKeyBytes` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `PublicKeyBytes`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Debug for PublicKeyBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKeyBytes({})", hex(&self.0[0..4]))
    }
}

/// Stake of a single participant.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Power(u64);

impl Power {
    /// Create a new `Power` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `Power`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

/// Sum of the [`Power`]s of any number of participants.
///
/// Stored as a `u128` so that summing every `u64` stake in a committee cannot overflow.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize,
    BorshSerialize,
)]
pub struct TotalPower(u128);

impl TotalPower {
    /// Create a new `TotalPower` with an `int` inner value.
    pub const fn new(int: u128) -> Self {
        Self(int)
    }

    /// Get the inner `u128` value of this `TotalPower`.
    pub const fn int(&self) -> u128 {
        self.0
    }
}

impl Display for TotalPower {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl AddAssign<Power> for TotalPower {
    fn add_assign(&mut self, rhs: Power) {
        self.0 += rhs.int() as u128
    }
}

/// Fraction of total stake that a set of votes must strictly exceed to form a certificate.
///
/// The threshold for a committee with total stake `T` is `floor(T * numerator / denominator) + 1`,
/// computed exactly with integer arithmetic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct ThresholdFraction {
    numerator: u64,
    denominator: u64,
}

impl ThresholdFraction {
    /// Create a new `ThresholdFraction`. Returns `None` unless `0 < numerator < denominator`.
    pub const fn new(numerator: u64, denominator: u64) -> Option<Self> {
        if numerator == 0 || numerator >= denominator {
            return None;
        }
        Some(Self {
            numerator,
            denominator,
        })
    }

    /// The classic BFT supermajority of two-thirds.
    pub const fn two_thirds() -> Self {
        Self {
            numerator: 2,
            denominator: 3,
        }
    }

    pub const fn numerator(&self) -> u64 {
        self.numerator
    }

    pub const fn denominator(&self) -> u64 {
        self.denominator
    }

    /// Compute the minimum stake that a certificate must carry for a committee whose stakes sum up to
    /// `total`.
    pub fn threshold(&self, total: TotalPower) -> TotalPower {
        let (n, d) = (self.numerator as u128, self.denominator as u128);
        let t = total.int();
        // floor(t * n / d) without forming t * n.
        TotalPower::new((t / d) * n + ((t % d) * n) / d + 1)
    }
}

impl Default for ThresholdFraction {
    fn default() -> Self {
        Self::two_thirds()
    }
}

/// 32 bytes of randomness fixed at the start of an epoch, used to derive the leader schedule.
#[derive(Clone, Copy, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct EpochSeed([u8; 32]);

impl EpochSeed {
    /// Create a new `EpochSeed` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `EpochSeed`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Debug for EpochSeed {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "EpochSeed({})", hex(&self.0[0..4]))
    }
}

/// Opaque 64-byte signature produced by a
/// [`VoteSigner`](super::crypto_primitives::VoteSigner).
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    /// Create a new `SignatureBytes` wrapping `bytes`.
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 64]` value of this `SignatureBytes`.
    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

/// Aggregated signature evidence of a certificate.
///
/// Index-aligned with the [`Committee`](super::committee::Committee) the certificate was formed in:
/// position `i` holds the signature of the `i`-th participant of the committee, or `None` if that
/// participant did not contribute.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureSet(Vec<Option<SignatureBytes>>);

impl SignatureSet {
    /// Create a new `SignatureSet` with `len` empty positions.
    pub fn new(len: usize) -> Self {
        Self(vec![None; len])
    }

    /// Create a `SignatureSet` with no positions at all, as carried by the genesis certificate.
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    /// Get the signature at position `pos`, if any.
    pub fn get(&self, pos: usize) -> Option<&SignatureBytes> {
        self.0.get(pos).and_then(|signature| signature.as_ref())
    }

    /// Set the signature at position `pos`. Does nothing if `pos` is out of bounds.
    pub fn set(&mut self, pos: usize, signature: Option<SignatureBytes>) {
        if let Some(slot) = self.0.get_mut(pos) {
            *slot = signature
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Count the positions that hold a signature.
    pub fn count(&self) -> usize {
        self.0.iter().filter(|signature| signature.is_some()).count()
    }

    pub fn iter(&self) -> slice::Iter<'_, Option<SignatureBytes>> {
        self.0.iter()
    }
}

/// Opaque payload of a block, made out of [`Datum`]s that only the application interprets.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Data(Vec<Datum>);

impl Data {
    /// Create a new `Data` containing `datum_vec`.
    pub const fn new(datum_vec: Vec<Datum>) -> Self {
        Self(datum_vec)
    }

    pub const fn vec(&self) -> &Vec<Datum> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, Datum> {
        self.0.iter()
    }
}

/// A single item of [`Data`].
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Datum(Vec<u8>);

impl Datum {
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> &Vec<u8> {
        &self.0
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{:02x}", byte)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_strictly_above_fraction_of_total() {
        let two_thirds = ThresholdFraction::two_thirds();
        assert_eq!(two_thirds.threshold(TotalPower::new(100)), TotalPower::new(67));
        assert_eq!(two_thirds.threshold(TotalPower::new(3)), TotalPower::new(3));
        assert_eq!(two_thirds.threshold(TotalPower::new(4)), TotalPower::new(3));
        assert_eq!(two_thirds.threshold(TotalPower::new(1)), TotalPower::new(1));

        let half = ThresholdFraction::new(1, 2).unwrap();
        assert_eq!(half.threshold(TotalPower::new(10)), TotalPower::new(6));
    }

    #[test]
    fn threshold_does_not_overflow_on_huge_totals() {
        let two_thirds = ThresholdFraction::two_thirds();
        let total = TotalPower::new(u128::MAX - 1);
        let threshold = two_thirds.threshold(total);
        assert!(threshold.int() > total.int() / 3 * 2);
        assert!(threshold.int() < total.int());
    }

    #[test]
    fn degenerate_fractions_are_rejected() {
        assert!(ThresholdFraction::new(0, 3).is_none());
        assert!(ThresholdFraction::new(3, 3).is_none());
        assert!(ThresholdFraction::new(4, 3).is_none());
        assert!(ThresholdFraction::new(2, 3).is_some());
    }

    #[test]
    fn signature_set_ignores_out_of_bounds_positions() {
        let mut signatures = SignatureSet::new(2);
        signatures.set(1, Some(SignatureBytes::new([7; 64])));
        signatures.set(5, Some(SignatureBytes::new([9; 64])));
        assert_eq!(signatures.count(), 1);
        assert_eq!(signatures.get(1), Some(&SignatureBytes::new([7; 64])));
        assert_eq!(signatures.get(0), None);
    }
}
