//! Pending Interest Table and propagation (spec.md §3/§4.5).

use crate::face::FaceId;
use crate::rng::Rng48;
use std::collections::{HashMap, HashSet, VecDeque};
use udcn_common::packet::Interest;

pub mod flags {
    pub const UNSENT: u8 = 1 << 0;
    pub const WAIT1: u8 = 1 << 1;
    pub const STUFFED1: u8 = 1 << 2;
}

/// Unicast faces tolerate a few redundant copies of the same Interest from
/// one source before treating further copies as a flood; broadcast-like
/// faces tolerate none (spec.md §4.5).
pub const MAX_REDUNDANT_UNICAST: u32 = 3;
pub const MAX_REDUNDANT_BROADCAST: u32 = 0;

pub struct PendingInterest {
    pub nonce: [u8; 6],
    pub interest: Interest,
    pub prefix_key: Vec<u8>,
    pub origin_face: FaceId,
    pub flags: u8,
    /// Countdown to reap, microseconds.
    pub residual_us: u64,
    /// Outbound faces not yet tried, in the order they'll be drained.
    pub outbound: VecDeque<FaceId>,
    pub redundant_from: HashMap<FaceId, u32>,
    /// Handle on the scheduler callback draining `outbound`, so the entry
    /// can cancel its own re-arm the moment it's satisfied rather than
    /// waiting for one more stale tick.
    pub propagate_handle: Option<crate::scheduler::Handle>,
}

impl PendingInterest {
    pub fn matches_everything_but_nonce(&self, other: &Interest) -> bool {
        self.interest.name == other.name
            && self.interest.can_be_prefix == other.can_be_prefix
            && self.interest.must_be_fresh == other.must_be_fresh
            && self.interest.scope == other.scope
    }
}

pub struct Pit {
    by_nonce: HashMap<[u8; 6], PendingInterest>,
}

/// Outcome of processing an inbound Interest against the PIT (spec.md
/// §4.5). The dispatcher acts on this rather than the PIT mutating faces
/// or the scheduler directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// A duplicate copy on a face already recorded; dropped.
    DuplicateDropped,
    /// A new entry was inserted and should be scheduled for propagation.
    Inserted,
}

impl Pit {
    pub fn new() -> Self {
        Self { by_nonce: HashMap::new() }
    }

    pub fn get(&self, nonce: &[u8; 6]) -> Option<&PendingInterest> {
        self.by_nonce.get(nonce)
    }

    pub fn get_mut(&mut self, nonce: &[u8; 6]) -> Option<&mut PendingInterest> {
        self.by_nonce.get_mut(nonce)
    }

    pub fn len(&self) -> usize {
        self.by_nonce.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_nonce.is_empty()
    }

    /// Step 2 of spec.md §4.5: if the nonce is already pending, remove `F`
    /// from its outbound set (duplicate suppression across faces) rather
    /// than inserting a new entry.
    pub fn suppress_duplicate(&mut self, nonce: &[u8; 6], from_face: FaceId) -> bool {
        if let Some(entry) = self.by_nonce.get_mut(nonce) {
            entry.outbound.retain(|f| *f != from_face);
            true
        } else {
            false
        }
    }

    /// Walks the prefix's pending-interest list for entries matching
    /// everything but nonce (spec.md §4.5
    /// `adjust_outbound_for_existing_interests`). Returns `None` if the new
    /// interest should be dropped as redundant, or `Some(extra_delay_us)`
    /// with the outbound set already restricted to the intersection found.
    pub fn adjust_outbound_for_existing_interests(
        &mut self,
        prefix_pit_nonces: &[[u8; 6]],
        new_interest: &Interest,
        origin_face: FaceId,
        origin_is_broadcast_like: bool,
        predicted_response_us: u64,
        outbound: &mut HashSet<FaceId>,
    ) -> Option<u64> {
        let mut extra_delay_us = 0u64;
        for nonce in prefix_pit_nonces {
            let Some(existing) = self.by_nonce.get_mut(nonce) else { continue };
            if !existing.matches_everything_but_nonce(new_interest) {
                continue;
            }

            let count = existing.redundant_from.entry(origin_face).or_insert(0);
            *count += 1;
            let max_redundant = if origin_is_broadcast_like { MAX_REDUNDANT_BROADCAST } else { MAX_REDUNDANT_UNICAST };
            if *count > max_redundant {
                return None;
            }

            let existing_outbound: HashSet<FaceId> = existing.outbound.iter().copied().collect();
            outbound.retain(|f| existing_outbound.contains(f));

            let same_face = existing.origin_face == origin_face;
            extra_delay_us += predicted_response_us + if same_face { 20_000 } else { 10_000 };
        }
        Some(extra_delay_us)
    }

    /// Inserts a new pending-interest entry keyed by nonce (spec.md §4.5).
    /// If the Interest carries no nonce the caller must generate one first
    /// (see `Rng48::nonce6`) and splice it into the stored copy.
    pub fn insert(
        &mut self,
        nonce: [u8; 6],
        interest: Interest,
        prefix_key: Vec<u8>,
        origin_face: FaceId,
        outbound: VecDeque<FaceId>,
        lifetime_us: u64,
    ) {
        self.by_nonce.insert(
            nonce,
            PendingInterest {
                nonce,
                interest,
                prefix_key,
                origin_face,
                flags: flags::UNSENT,
                residual_us: lifetime_us,
                outbound,
                redundant_from: HashMap::new(),
                propagate_handle: None,
            },
        );
    }

    pub fn remove(&mut self, nonce: &[u8; 6]) -> Option<PendingInterest> {
        self.by_nonce.remove(nonce)
    }

    pub fn nonces_for_prefix<'a>(&'a self, prefix_key: &'a [u8]) -> impl Iterator<Item = [u8; 6]> + 'a {
        self.by_nonce.values().filter(move |e| e.prefix_key == prefix_key).map(|e| e.nonce)
    }
}

impl Default for Pit {
    fn default() -> Self {
        Self::new()
    }
}

/// One step of the `propagate` scheduled callback (spec.md §4.5): pops one
/// face off the outbound set. Pacing/jitter and the CONTROL-face delay are
/// computed by the caller (the dispatcher owns the scheduler and RNG); this
/// just does the state transition.
pub struct PropagateStep {
    pub face: FaceId,
    pub became_wait1: bool,
}

pub fn propagate_step(entry: &mut PendingInterest, predicted_source: Option<FaceId>) -> Option<PropagateStep> {
    let face = entry.outbound.pop_front()?;
    let became_wait1 = entry.flags & flags::UNSENT != 0 && Some(face) == predicted_source;
    if became_wait1 {
        entry.flags &= !flags::UNSENT;
        entry.flags |= flags::WAIT1;
    }
    Some(PropagateStep { face, became_wait1 })
}

pub fn next_send_delay_us(rng: &mut Rng48) -> u64 {
    500 + (rng.next_u32() % 8192) as u64
}

/// Encodes a nonce as a `u64` key for the prefix's `pit_entries` list
/// (spec.md §9 models the intrusive list as arena indices; a nonce already
/// uniquely identifies the entry, so we reuse it rather than adding a
/// second id space).
pub fn nonce_to_u64(nonce: [u8; 6]) -> u64 {
    let mut buf = [0u8; 8];
    buf[..6].copy_from_slice(&nonce);
    u64::from_be_bytes(buf)
}

pub const CONTROL_FACE_EXTRA_DELAY_US: u64 = 60_000;
pub const REARM_FRACTION_NUMERATOR: u64 = 1;
pub const REARM_FRACTION_DENOMINATOR: u64 = 4;

#[cfg(test)]
mod tests {
    use super::*;

    fn face(slot: u32) -> FaceId {
        FaceId { slot, generation: 0 }
    }

    fn interest(name: &str) -> Interest {
        Interest::new(udcn_common::name::Name::from_str(name))
    }

    #[test]
    fn duplicate_on_same_face_within_lifetime_is_suppressed() {
        // spec.md §8 scenario 4
        let mut pit = Pit::new();
        let nonce = [1u8; 6];
        let mut outbound = VecDeque::new();
        outbound.push_back(face(2));
        pit.insert(nonce, interest("/a"), vec![], face(1), outbound, 4_000_000);

        let suppressed = pit.suppress_duplicate(&nonce, face(1));
        assert!(suppressed);
        // second copy on the same originating face should not add itself
        // back to outbound
        assert!(pit.get(&nonce).unwrap().outbound.contains(&face(2)));
    }

    #[test]
    fn reachable_from_exactly_one_prefix_and_from_nonce_hash() {
        // spec.md §8 invariant 4
        let mut pit = Pit::new();
        let nonce = [2u8; 6];
        pit.insert(nonce, interest("/b"), b"/b".to_vec(), face(1), VecDeque::new(), 1_000_000);
        assert!(pit.get(&nonce).is_some());
        let for_prefix: Vec<_> = pit.nonces_for_prefix(b"/b").collect();
        assert_eq!(for_prefix, vec![nonce]);
    }

    #[test]
    fn aggregation_restricts_outbound_to_intersection() {
        // spec.md §8 scenario 3 (simplified to the set-intersection law)
        let mut pit = Pit::new();
        let existing_nonce = [3u8; 6];
        let mut existing_outbound = VecDeque::new();
        existing_outbound.push_back(face(5));
        existing_outbound.push_back(face(6));
        pit.insert(existing_nonce, interest("/c"), b"/c".to_vec(), face(10), existing_outbound, 4_000_000);

        let mut new_outbound: HashSet<FaceId> = [face(5), face(7)].into_iter().collect();
        let new_interest = interest("/c");
        let nonces = [existing_nonce];
        let delay =
            pit.adjust_outbound_for_existing_interests(&nonces, &new_interest, face(11), false, 8192, &mut new_outbound);
        assert!(delay.is_some());
        assert_eq!(new_outbound, HashSet::from([face(5)]));
    }

    #[test]
    fn propagated_face_is_never_the_arrival_face() {
        // spec.md §8 invariant 5 -- enforced by the caller excluding F before
        // building the outbound set; this just checks propagate_step never
        // invents a face not already in the set.
        let mut outbound = VecDeque::new();
        outbound.push_back(face(9));
        let mut entry = PendingInterest {
            nonce: [4u8; 6],
            interest: interest("/d"),
            prefix_key: vec![],
            origin_face: face(1),
            flags: flags::UNSENT,
            residual_us: 4_000_000,
            outbound,
            redundant_from: HashMap::new(),
            propagate_handle: None,
        };
        let step = propagate_step(&mut entry, Some(face(9))).unwrap();
        assert_eq!(step.face, face(9));
        assert!(step.became_wait1);
        assert_eq!(entry.flags & flags::WAIT1, flags::WAIT1);
    }
}
