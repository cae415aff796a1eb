//! Face table: slotted array of transport endpoints (spec.md §3/§4.2).

use bytes::BytesMut;
use std::collections::HashMap;

/// Number of bits given to the slot portion of a faceid; the remaining high
/// bits are the generation counter (spec.md §3).
pub const SLOT_BITS: u32 = 20;
pub const MAX_SLOTS: u32 = (1 << SLOT_BITS) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaceId {
    pub slot: u32,
    pub generation: u32,
}

impl FaceId {
    pub fn packed(self) -> u64 {
        ((self.generation as u64) << SLOT_BITS) | self.slot as u64
    }

    pub fn from_packed(value: u64) -> Self {
        Self {
            slot: (value & MAX_SLOTS as u64) as u32,
            generation: (value >> SLOT_BITS) as u32,
        }
    }
}

/// Hand-rolled flag bits rather than a `bitflags` dependency the teacher
/// workspace doesn't otherwise use (see DESIGN.md).
pub mod flags {
    pub const LINK_FRAMED: u16 = 1 << 0;
    pub const DGRAM: u16 = 1 << 1;
    pub const FRIENDLY: u16 = 1 << 2;
    pub const LOCAL: u16 = 1 << 3;
    pub const INET: u16 = 1 << 4;
    pub const INET6: u16 = 1 << 5;
    pub const MCAST: u16 = 1 << 6;
    pub const CONTROL: u16 = 1 << 7;
    pub const DO_NOT_SEND: u16 = 1 << 8;
    pub const UNDECIDED: u16 = 1 << 9;
    pub const PERMANENT: u16 = 1 << 10;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaceFlags(pub u16);

impl FaceFlags {
    pub fn has(self, bit: u16) -> bool {
        self.0 & bit != 0
    }
    pub fn set(&mut self, bit: u16) {
        self.0 |= bit;
    }
    pub fn clear(&mut self, bit: u16) {
        self.0 &= !bit;
    }
}

/// Peer address, transport-agnostic; `udcn-transport` owns the concrete
/// socket representations, this is only what the core needs for hashing
/// and logging.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PeerAddr {
    None,
    Socket(std::net::SocketAddr),
}

pub struct Face {
    pub id: FaceId,
    pub flags: FaceFlags,
    pub peer: PeerAddr,
    /// Incremental parser state: bytes accumulated so far for the frame in
    /// progress (spec.md §6 "preserving decoder state across read() calls").
    pub inbound: BytesMut,
    /// Non-empty only when a prior send was partial (spec.md §3).
    pub outbound_tail: Option<BytesMut>,
    pub pending_interest_count: u32,
    pub activity_counter: u64,
    pub surplus_send_counter: u64,
}

impl Face {
    pub fn new(id: FaceId, flags: FaceFlags, peer: PeerAddr) -> Self {
        Self {
            id,
            flags,
            peer,
            inbound: BytesMut::new(),
            outbound_tail: None,
            pending_interest_count: 0,
            activity_counter: 0,
            surplus_send_counter: 0,
        }
    }
}

enum Slot {
    Empty,
    Occupied(Face),
}

pub struct FaceTable {
    slots: Vec<(u32, Slot)>, // (generation, slot contents)
    rover: usize,
    by_peer: HashMap<PeerAddr, FaceId>,
    /// Tracks whether the most recently enrolled face in each slot was
    /// UNDECIDED and never promoted, for the no-generation-bump teardown
    /// exception (spec.md §3).
    last_enrolled_slot: Option<usize>,
}

impl FaceTable {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            rover: 0,
            by_peer: HashMap::new(),
            last_enrolled_slot: None,
        }
    }

    /// Assigns the lowest free slot scanning forward from the rover,
    /// wrapping, growing by ~1.5x (capped at `MAX_SLOTS`) when all slots are
    /// occupied. Each wrap bumps the generation of the slot it lands on.
    pub fn enroll(&mut self, flags: FaceFlags, peer: PeerAddr) -> Result<FaceId, crate::error::Error> {
        if self.slots.is_empty() {
            self.slots.push((0, Slot::Empty));
        }

        let start = self.rover;
        let len = self.slots.len();
        for offset in 0..len {
            let idx = (start + offset) % len;
            if matches!(self.slots[idx].1, Slot::Empty) {
                return self.place(idx, flags, peer, false);
            }
        }

        // All occupied: grow.
        let new_len = ((len as f64 * 1.5).ceil() as usize).max(len + 1);
        let new_len = new_len.min(MAX_SLOTS as usize);
        if new_len <= len {
            return Err(crate::error::Error::FaceTableExhausted);
        }
        let grow_from = len;
        self.slots.resize_with(new_len, || (0, Slot::Empty));
        self.place(grow_from, flags, peer, true)
    }

    fn place(
        &mut self,
        idx: usize,
        flags: FaceFlags,
        peer: PeerAddr,
        wrapped: bool,
    ) -> Result<FaceId, crate::error::Error> {
        if wrapped {
            self.slots[idx].0 = self.slots[idx].0.wrapping_add(1);
        }
        let generation = self.slots[idx].0;
        let id = FaceId { slot: idx as u32, generation };
        if !matches!(peer, PeerAddr::None) {
            self.by_peer.insert(peer.clone(), id);
        }
        self.slots[idx].1 = Slot::Occupied(Face::new(id, flags, peer));
        self.rover = (idx + 1) % self.slots.len();
        self.last_enrolled_slot = Some(idx);
        Ok(id)
    }

    pub fn lookup(&self, id: FaceId) -> Option<&Face> {
        let (generation, slot) = self.slots.get(id.slot as usize)?;
        if *generation != id.generation {
            return None;
        }
        match slot {
            Slot::Occupied(face) if face.id == id => Some(face),
            _ => None,
        }
    }

    pub fn lookup_mut(&mut self, id: FaceId) -> Option<&mut Face> {
        let (generation, slot) = self.slots.get_mut(id.slot as usize)?;
        if *generation != id.generation {
            return None;
        }
        match slot {
            Slot::Occupied(face) if face.id == id => Some(face),
            _ => None,
        }
    }

    pub fn lookup_by_peer(&self, peer: &PeerAddr) -> Option<FaceId> {
        self.by_peer.get(peer).copied()
    }

    /// Removes the face. If it was the most recently enrolled slot and it
    /// never left UNDECIDED, the generation is not advanced so the same
    /// slot+generation can be handed out again immediately (spec.md §3/§4.2
    /// exception).
    pub fn remove(&mut self, id: FaceId) -> bool {
        let Some((generation, slot)) = self.slots.get_mut(id.slot as usize) else {
            return false;
        };
        if *generation != id.generation {
            return false;
        }
        let was_undecided_and_last = matches!(slot, Slot::Occupied(f) if f.flags.has(flags::UNDECIDED))
            && self.last_enrolled_slot == Some(id.slot as usize);
        match slot {
            Slot::Occupied(face) if face.id == id => {
                if !matches!(face.peer, PeerAddr::None) {
                    self.by_peer.remove(&face.peer);
                }
            }
            _ => return false,
        }
        self.slots[id.slot as usize].1 = Slot::Empty;
        if was_undecided_and_last {
            // recycle without bumping generation; rover backs up to this slot
            self.rover = id.slot as usize;
            self.last_enrolled_slot = None;
        }
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &Face> {
        self.slots.iter().filter_map(|(_, slot)| match slot {
            Slot::Occupied(face) => Some(face),
            Slot::Empty => None,
        })
    }
}

impl Default for FaceTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_requires_exact_generation_match() {
        let mut table = FaceTable::new();
        let id = table.enroll(FaceFlags::default(), PeerAddr::None).unwrap();
        assert!(table.lookup(id).is_some());
        let stale = FaceId { slot: id.slot, generation: id.generation.wrapping_add(1) };
        assert!(table.lookup(stale).is_none());
    }

    #[test]
    fn slot_reuse_bumps_generation_for_decided_face() {
        let mut table = FaceTable::new();
        let mut flags = FaceFlags::default();
        flags.set(flags::LOCAL); // decided, not UNDECIDED
        let first = table.enroll(flags, PeerAddr::None).unwrap();
        table.remove(first);
        let second = table.enroll(flags, PeerAddr::None).unwrap();
        assert_eq!(second.slot, first.slot);
        assert_ne!(second.generation, first.generation);
        assert!(table.lookup(first).is_none());
    }

    #[test]
    fn undecided_teardown_recycles_without_generation_bump() {
        let mut table = FaceTable::new();
        let mut flags = FaceFlags::default();
        flags.set(flags::UNDECIDED);
        let first = table.enroll(flags, PeerAddr::None).unwrap();
        table.remove(first);
        let second = table.enroll(flags, PeerAddr::None).unwrap();
        assert_eq!(second.slot, first.slot);
        assert_eq!(second.generation, first.generation);
    }

    #[test]
    fn grows_when_all_slots_occupied() {
        let mut table = FaceTable::new();
        let mut flags = FaceFlags::default();
        flags.set(flags::LOCAL);
        let first = table.enroll(flags, PeerAddr::None).unwrap();
        let second = table.enroll(flags, PeerAddr::None).unwrap();
        assert_ne!(first.slot, second.slot);
    }

    #[test]
    fn stale_faceid_never_delivered_after_slot_reuse() {
        // spec.md §8 scenario 6
        let mut table = FaceTable::new();
        let mut flags = FaceFlags::default();
        flags.set(flags::LOCAL);
        let peer1 = PeerAddr::Socket("127.0.0.1:1".parse().unwrap());
        let peer2 = PeerAddr::Socket("127.0.0.1:2".parse().unwrap());
        let old = table.enroll(flags, peer1).unwrap();
        table.remove(old);
        let new_face = table.enroll(flags, peer2).unwrap();
        assert_eq!(old.slot, new_face.slot);
        assert!(table.lookup(old).is_none());
        assert!(table.lookup(new_face).is_some());
    }
}
