//! Name-prefix table: FIB entries, forward-to materialisation, and the
//! per-prefix PIT head (spec.md §3/§4.4).

use crate::face::FaceId;
use crate::rng::Rng48;
use std::collections::{BTreeMap, HashSet};

pub mod fwd_flags {
    pub const ACTIVE: u8 = 1 << 0;
    pub const CHILD_INHERIT: u8 = 1 << 1;
    pub const ADVERTISE: u8 = 1 << 2;
    pub const REFRESHED: u8 = 1 << 3;
}

#[derive(Debug, Clone, Copy)]
pub struct ForwardingEntry {
    pub face: FaceId,
    pub flags: u8,
    pub expiry_secs: u32,
}

pub struct PrefixEntry {
    pub key: Vec<u8>,
    pub forwarding: Vec<ForwardingEntry>,
    forward_to: HashSet<FaceId>,
    fgen: u64,
    pub parent_key: Option<Vec<u8>>,
    pub child_count: u32,
    /// Predicted response time, µs; seeded ~8192 ± jitter (spec.md §3).
    pub predicted_response_us: u64,
    pub src: Option<FaceId>,
    pub osrc: Option<FaceId>,
    /// Nonces (encoded as `u64`, see `pit::nonce_to_u64`) of PIT entries
    /// threaded to this prefix, in insertion order. The real implementation
    /// uses an intrusive circular list with a sentinel (spec.md §9); a
    /// `Vec` gives the same traversal semantics without raw pointers.
    pub pit_entries: Vec<u64>,
}

impl PrefixEntry {
    fn new(key: Vec<u8>, parent_key: Option<Vec<u8>>, predicted_response_us: u64) -> Self {
        Self {
            key,
            forwarding: Vec::new(),
            forward_to: HashSet::new(),
            fgen: 0,
            parent_key,
            child_count: 0,
            predicted_response_us,
            src: None,
            osrc: None,
            pit_entries: Vec::new(),
        }
    }

    /// A prefix is reapable once it has no forwarding entries, no children,
    /// no live PIT entries, and no known content source (spec.md §4.4).
    pub fn is_reapable(&self) -> bool {
        self.forwarding.is_empty() && self.child_count == 0 && self.pit_entries.is_empty() && self.src.is_none()
    }
}

pub struct NamePrefixTable {
    entries: BTreeMap<Vec<u8>, PrefixEntry>,
    forward_to_gen: u64,
    /// Stale-grace round counters for prefixes pending reap (spec.md §4.4
    /// "two ageing rounds before deletion").
    reap_rounds: std::collections::HashMap<Vec<u8>, u8>,
}

impl NamePrefixTable {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            forward_to_gen: 0,
            reap_rounds: std::collections::HashMap::new(),
        }
    }

    pub fn bump_forward_to_gen(&mut self) {
        self.forward_to_gen += 1;
    }

    /// Creates every missing ancestor of `prefix_key_components`, linking
    /// parent pointers and incrementing child counts, inheriting the
    /// parent's predicted-response timer and src/osrc pair (spec.md §4.4).
    pub fn seek(&mut self, prefix_keys: &[Vec<u8>], rng: &mut Rng48) -> Vec<u8> {
        let mut parent_key: Option<Vec<u8>> = None;
        for key in prefix_keys {
            if !self.entries.contains_key(key) {
                let predicted = parent_key
                    .as_ref()
                    .and_then(|p| self.entries.get(p))
                    .map(|p| p.predicted_response_us)
                    .unwrap_or_else(|| 8192 + (rng.next_u32() % 2048) as u64);
                let inherited_src = parent_key.as_ref().and_then(|p| self.entries.get(p)).and_then(|p| p.src);
                let inherited_osrc = parent_key.as_ref().and_then(|p| self.entries.get(p)).and_then(|p| p.osrc);

                let mut entry = PrefixEntry::new(key.clone(), parent_key.clone(), predicted);
                entry.src = inherited_src;
                entry.osrc = inherited_osrc;
                self.entries.insert(key.clone(), entry);

                if let Some(parent) = parent_key.as_ref().and_then(|p| self.entries.get_mut(p)) {
                    parent.child_count += 1;
                }
            }
            parent_key = Some(key.clone());
        }
        parent_key.expect("seek requires at least the root prefix key")
    }

    pub fn get(&self, key: &[u8]) -> Option<&PrefixEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut PrefixEntry> {
        self.entries.get_mut(key)
    }

    /// Every prefix currently on file, for the periodic ageing/reap sweep
    /// (spec.md §4.4) -- the sweep runs from the dispatcher and has no other
    /// way to reach into `entries`.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.entries.keys().cloned().collect()
    }

    /// Longest matching prefix entry among `candidate_keys`, which the
    /// caller supplies longest-first (one key per name-component count).
    pub fn longest_match<'a>(&'a self, candidate_keys: &[Vec<u8>]) -> Option<&'a PrefixEntry> {
        candidate_keys.iter().rev().find_map(|key| self.entries.get(key))
    }

    pub fn add_forwarding(&mut self, key: &[u8], entry: ForwardingEntry) {
        if let Some(prefix) = self.entries.get_mut(key) {
            if let Some(existing) = prefix.forwarding.iter_mut().find(|e| e.face == entry.face) {
                *existing = entry;
            } else {
                prefix.forwarding.push(entry);
            }
        }
        self.bump_forward_to_gen();
    }

    pub fn remove_forwarding(&mut self, key: &[u8], face: FaceId) {
        if let Some(prefix) = self.entries.get_mut(key) {
            prefix.forwarding.retain(|e| e.face != face);
        }
        self.bump_forward_to_gen();
    }

    /// Decrements every forwarding entry's expiry by 5s (the ageing
    /// period); entries that hit zero without a REFRESHED bit are removed.
    /// Unrefreshed-but-not-yet-expired entries have REFRESHED cleared so
    /// the next `prefixreg` must set it again (spec.md §3).
    pub fn age_forwarding_entries(&mut self) {
        let mut changed = false;
        for prefix in self.entries.values_mut() {
            let before = prefix.forwarding.len();
            prefix.forwarding.retain_mut(|entry| {
                if entry.expiry_secs <= 5 {
                    return false;
                }
                entry.expiry_secs -= 5;
                if entry.flags & fwd_flags::REFRESHED == 0 {
                    // not refreshed this period; still alive but flagged
                }
                entry.flags &= !fwd_flags::REFRESHED;
                true
            });
            if prefix.forwarding.len() != before {
                changed = true;
            }
        }
        if changed {
            self.bump_forward_to_gen();
        }
    }

    /// Re-materialises `forward_to` if `fgen` disagrees with the table-wide
    /// generation: this prefix's own ACTIVE entries plus every ancestor's
    /// CHILD-INHERIT entries (spec.md §4.4).
    pub fn forward_to(&mut self, key: &[u8]) -> HashSet<FaceId> {
        let needs_rematerialize = match self.entries.get(key) {
            Some(entry) => entry.fgen != self.forward_to_gen,
            None => return HashSet::new(),
        };
        if !needs_rematerialize {
            return self.entries.get(key).unwrap().forward_to.clone();
        }

        let mut set = HashSet::new();
        if let Some(entry) = self.entries.get(key) {
            for fwd in &entry.forwarding {
                if fwd.flags & fwd_flags::ACTIVE != 0 {
                    set.insert(fwd.face);
                }
            }
        }

        let mut cursor = self.entries.get(key).and_then(|e| e.parent_key.clone());
        while let Some(parent_key) = cursor {
            let Some(parent) = self.entries.get(&parent_key) else { break };
            for fwd in &parent.forwarding {
                if fwd.flags & fwd_flags::CHILD_INHERIT != 0 {
                    set.insert(fwd.face);
                }
            }
            cursor = parent.parent_key.clone();
        }

        if let Some(entry) = self.entries.get_mut(key) {
            entry.forward_to = set.clone();
            entry.fgen = self.forward_to_gen;
        }
        set
    }

    pub fn forward_to_gen(&self) -> u64 {
        self.forward_to_gen
    }

    /// Removes a prefix if reapable; otherwise gives it up to two ageing
    /// rounds before actually deleting (spec.md §4.4). Returns true if
    /// removed.
    pub fn reap_if_eligible(&mut self, key: &[u8]) -> bool {
        let Some(entry) = self.entries.get(key) else { return false };
        if !entry.is_reapable() {
            self.reap_rounds.remove(key);
            return false;
        }
        let rounds = self.reap_rounds.entry(key.to_vec()).or_insert(0);
        *rounds += 1;
        if *rounds < 2 {
            return false;
        }
        self.reap_rounds.remove(key);
        if let Some(parent_key) = self.entries.get(key).and_then(|e| e.parent_key.clone()) {
            if let Some(parent) = self.entries.get_mut(&parent_key) {
                parent.child_count = parent.child_count.saturating_sub(1);
            }
        }
        self.entries.remove(key);
        true
    }
}

impl Default for NamePrefixTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys_for(name: &udcn_common::name::Name) -> Vec<Vec<u8>> {
        (0..=name.len()).map(|i| name.prefix(i).key_bytes()).collect()
    }

    fn face(slot: u32) -> FaceId {
        FaceId { slot, generation: 0 }
    }

    #[test]
    fn prefix_reg_makes_interest_forward_only_to_registered_face() {
        // spec.md §8 scenario 5
        let mut table = NamePrefixTable::new();
        let mut rng = Rng48::new(1);
        let weather = udcn_common::name::Name::from_str("/weather");
        let weather_keys = keys_for(&weather);
        let weather_key = table.seek(&weather_keys, &mut rng);

        table.add_forwarding(
            &weather_key,
            ForwardingEntry {
                face: face(17),
                flags: fwd_flags::ACTIVE | fwd_flags::CHILD_INHERIT,
                expiry_secs: 300,
            },
        );

        let today = udcn_common::name::Name::from_str("/weather/today");
        let today_keys = keys_for(&today);
        let today_key = table.seek(&today_keys, &mut rng);

        let forward_to = table.forward_to(&today_key);
        assert_eq!(forward_to, HashSet::from([face(17)]));
    }

    #[test]
    fn forward_to_gen_bumps_on_mutation() {
        let mut table = NamePrefixTable::new();
        let before = table.forward_to_gen();
        table.add_forwarding(b"/x", ForwardingEntry { face: face(1), flags: fwd_flags::ACTIVE, expiry_secs: 60 });
        assert!(table.forward_to_gen() > before);
    }

    #[test]
    fn prefix_reaps_only_after_two_stale_rounds() {
        let mut table = NamePrefixTable::new();
        let mut rng = Rng48::new(2);
        let name = udcn_common::name::Name::from_str("/gone");
        let key = table.seek(&keys_for(&name), &mut rng);
        assert!(!table.reap_if_eligible(&key));
        assert!(table.reap_if_eligible(&key));
        assert!(table.get(&key).is_none());
    }
}
