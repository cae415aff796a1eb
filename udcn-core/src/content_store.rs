//! Content Store: hash table + accession array + skiplist (spec.md §3/§4.3).

use crate::rng::Rng48;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use udcn_common::name::{Name, NameComponent};
use udcn_common::packet::{ContentObject, Interest, OrderPreference, SignedInfo};

pub mod flags {
    pub const SLOW_SEND: u8 = 1 << 0;
    pub const STALE: u8 = 1 << 1;
    pub const PRECIOUS: u8 = 1 << 2;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentFlags(pub u8);

impl ContentFlags {
    pub fn has(self, bit: u8) -> bool {
        self.0 & bit != 0
    }
    pub fn set(&mut self, bit: u8) {
        self.0 |= bit;
    }
    pub fn clear(&mut self, bit: u8) {
        self.0 &= !bit;
    }
}

/// Freshness is capped at 35 minutes; content carrying a larger value is
/// accepted but schedules no timer (spec.md §4.3, §8 boundary case).
pub const MAX_FRESHNESS_SECONDS: u32 = 35 * 60;

pub fn freshness_delay_us(freshness_seconds: Option<u32>) -> Option<u64> {
    let secs = freshness_seconds?;
    if secs > MAX_FRESHNESS_SECONDS {
        return None;
    }
    Some(secs as u64 * 1_000_000)
}

pub struct ContentEntry {
    pub accession: u64,
    /// The name with the synthesised terminal digest component spliced in
    /// (spec.md §4.3 step 1) -- this is what the skiplist orders on.
    pub name: Name,
    pub content: Bytes,
    pub signed_info: SignedInfo,
    pub flags: ContentFlags,
    /// Next-pointers at each tower level, by accession.
    tower: Vec<Option<u64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(u64),
    Duplicate(u64),
}

pub struct ContentStore {
    /// Keyed by the exact bytes from envelope start through end of the
    /// digest-spliced name. A real hash table can see two different keys
    /// collide and must compare tails; `HashMap` already resolves key
    /// equality for us, so the "collision with differing tail" branch
    /// spec.md §4.3 describes collapses into "duplicate vs. fresh insert"
    /// here.
    by_key: HashMap<Vec<u8>, u64>,
    content_by_accession: Vec<Option<ContentEntry>>,
    accession_base: u64,
    straggler: BTreeMap<u64, ContentEntry>,
    head_tower: Vec<Option<u64>>,
    next_accession: u64,
    capacity: usize,
}

impl ContentEntry {
    /// Rebuilds the wire-shaped object for re-serialisation when the entry
    /// is matched and needs to go back out a face.
    pub fn to_content_object(&self) -> ContentObject {
        ContentObject {
            name: self.name.clone(),
            signed_info: self.signed_info.clone(),
            content: self.content.clone(),
            digest: [0u8; 32],
        }
    }
}

impl ContentStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            by_key: HashMap::new(),
            content_by_accession: Vec::new(),
            accession_base: 0,
            straggler: BTreeMap::new(),
            head_tower: Vec::new(),
            next_accession: 0,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn get_entry(&self, accession: u64) -> Option<&ContentEntry> {
        if accession >= self.accession_base {
            let index = (accession - self.accession_base) as usize;
            if let Some(Some(entry)) = self.content_by_accession.get(index) {
                return Some(entry);
            }
        }
        self.straggler.get(&accession)
    }

    pub fn get_entry_mut(&mut self, accession: u64) -> Option<&mut ContentEntry> {
        if accession >= self.accession_base {
            let index = (accession - self.accession_base) as usize;
            if let Some(slot) = self.content_by_accession.get_mut(index) {
                if slot.is_some() {
                    return slot.as_mut();
                }
            }
        }
        self.straggler.get_mut(&accession)
    }

    /// Marks one entry STALE, the action a freshness timer takes on expiry
    /// (spec.md §4.3) -- distinct from `evict_if_over_capacity`'s own
    /// capacity-driven staling pass.
    pub fn mark_stale(&mut self, accession: u64) {
        if let Some(entry) = self.get_entry_mut(accession) {
            entry.flags.set(flags::STALE);
        }
    }

    fn next_at(&self, node: Option<u64>, level: usize) -> Option<u64> {
        match node {
            None => self.head_tower.get(level).copied().flatten(),
            Some(acc) => self.get_entry(acc).and_then(|e| e.tower.get(level).copied().flatten()),
        }
    }

    fn set_next_at(&mut self, node: Option<u64>, level: usize, value: Option<u64>) {
        match node {
            None => self.head_tower[level] = value,
            Some(acc) => {
                if let Some(entry) = self.get_entry_mut(acc) {
                    entry.tower[level] = value;
                }
            }
        }
    }

    /// Walks top-down, returning the predecessor at each level (the last
    /// node whose name is strictly less than `key`) and the first
    /// successor in name order (spec.md §4.3).
    fn find_before(&self, key: &Name) -> (Vec<Option<u64>>, Option<u64>) {
        let height = self.head_tower.len();
        let mut preds = vec![None; height];
        let mut current: Option<u64> = None;
        for level in (0..height).rev() {
            loop {
                let next = self.next_at(current, level);
                if let Some(next_acc) = next {
                    let next_name = &self.get_entry(next_acc).unwrap().name;
                    if next_name.cmp_canonical(key) == std::cmp::Ordering::Less {
                        current = Some(next_acc);
                        continue;
                    }
                }
                break;
            }
            preds[level] = current;
        }
        let successor = self.next_at(current, 0);
        (preds, successor)
    }

    fn sweep_low_density_to_straggler(&mut self) {
        let sweep_count = self.content_by_accession.len() / 4;
        if sweep_count == 0 {
            return;
        }
        let drained: Vec<Option<ContentEntry>> = self.content_by_accession.drain(0..sweep_count).collect();
        for (i, slot) in drained.into_iter().enumerate() {
            if let Some(entry) = slot {
                self.straggler.insert(self.accession_base + i as u64, entry);
            }
        }
        self.accession_base += sweep_count as u64;
    }

    fn make_room(&mut self, needed_index: usize) {
        if needed_index < self.content_by_accession.len() {
            return;
        }
        self.sweep_low_density_to_straggler();
        let needed_index = needed_index; // index is relative to accession, recomputed by caller
        if needed_index >= self.content_by_accession.len() {
            let grown = ((self.content_by_accession.len() as f64 * 1.5).ceil() as usize) + 20;
            let new_len = grown.max(needed_index + 1);
            self.content_by_accession.resize_with(new_len, || None);
        }
    }

    fn store_entry(&mut self, accession: u64, entry: ContentEntry) {
        let index = (accession - self.accession_base) as usize;
        if index >= self.content_by_accession.len() {
            self.make_room(index);
        }
        let index = (accession - self.accession_base) as usize;
        if index < self.content_by_accession.len() {
            self.content_by_accession[index] = Some(entry);
        } else {
            self.straggler.insert(accession, entry);
        }
    }

    fn delete_storage(&mut self, accession: u64) {
        if accession >= self.accession_base {
            let index = (accession - self.accession_base) as usize;
            if let Some(slot) = self.content_by_accession.get_mut(index) {
                *slot = None;
                return;
            }
        }
        self.straggler.remove(&accession);
    }

    /// Admits a parsed ContentObject (spec.md §4.3 steps 1-4). `digest` is
    /// the 32-byte digest the codec already computed.
    pub fn insert(&mut self, object: ContentObject, digest: [u8; 32], rng: &mut Rng48) -> InsertOutcome {
        let name_with_digest = object.name.clone().with_component(NameComponent::implicit_digest(digest));
        let key = name_with_digest.key_bytes();

        if let Some(&accession) = self.by_key.get(&key) {
            if let Some(entry) = self.get_entry_mut(accession) {
                entry.flags.clear(flags::STALE);
            }
            return InsertOutcome::Duplicate(accession);
        }

        let accession = self.next_accession;
        self.next_accession += 1;

        let height = rng.skiplist_height();
        if height > self.head_tower.len() {
            self.head_tower.resize(height, None);
        }

        let (preds, _) = self.find_before(&name_with_digest);
        let mut tower = vec![None; height];
        for level in 0..height {
            let pred = preds.get(level).copied().flatten();
            let next = self.next_at(pred, level);
            tower[level] = next;
        }

        let entry = ContentEntry {
            accession,
            name: name_with_digest,
            content: object.content,
            signed_info: object.signed_info,
            flags: ContentFlags::default(),
            tower,
        };
        self.store_entry(accession, entry);
        self.by_key.insert(key, accession);

        for level in 0..height {
            let pred = preds.get(level).copied().flatten();
            self.set_next_at(pred, level, Some(accession));
        }

        InsertOutcome::Inserted(accession)
    }

    pub fn remove(&mut self, accession: u64) -> bool {
        let Some(entry_name) = self.get_entry(accession).map(|e| e.name.clone()) else {
            return false;
        };
        let key = entry_name.key_bytes();
        let (preds, _) = self.find_before(&entry_name);
        let height = self.get_entry(accession).map(|e| e.tower.len()).unwrap_or(0);
        for level in 0..height {
            let pred = preds.get(level).copied().flatten();
            let next = self.get_entry(accession).and_then(|e| e.tower.get(level).copied().flatten());
            self.set_next_at(pred, level, next);
        }
        self.by_key.remove(&key);
        self.delete_storage(accession);
        true
    }

    fn matches_selectors(&self, interest: &Interest, entry: &ContentEntry) -> bool {
        let suffix_len = entry.name.len().saturating_sub(interest.name.len()) as u32;
        if let Some(min) = interest.selectors.min_suffix_components {
            if suffix_len < min {
                return false;
            }
        }
        if let Some(max) = interest.selectors.max_suffix_components {
            if suffix_len > max {
                return false;
            }
        }
        if interest.must_be_fresh && entry.flags.has(flags::STALE) {
            return false;
        }
        if let Some(next_component) = entry.name.get(interest.name.len()) {
            if interest.selectors.exclude.excludes(&next_component.bytes) {
                return false;
            }
        }
        true
    }

    /// Starting from `find_before(interest.name)`, walks forward in name
    /// order while the candidate still shares the requested prefix
    /// (spec.md §4.3). Leftmost order returns the first match; rightmost
    /// keeps walking and returns the last. At most one answer, ties broken
    /// by name order.
    pub fn find_match(&self, interest: &Interest) -> Option<u64> {
        let (_, mut current) = self.find_before(&interest.name);
        let mut best = None;
        while let Some(accession) = current {
            let entry = self.get_entry(accession)?;
            if !interest.name.is_prefix_of(&entry.name) {
                break;
            }
            if self.matches_selectors(interest, entry) {
                best = Some(accession);
                if interest.order_preference == OrderPreference::Leftmost {
                    break;
                }
            }
            current = entry.tower.first().copied().flatten();
        }
        best
    }

    fn ordered_accessions_ascending(&self) -> Vec<u64> {
        let mut direct: Vec<u64> = self
            .content_by_accession
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| self.accession_base + i as u64))
            .collect();
        direct.extend(self.straggler.keys().copied());
        direct.sort_unstable();
        direct
    }

    /// Two-phase cleaner (spec.md §4.3): evict already-STALE non-PRECIOUS
    /// entries first, then mark the oldest remaining non-PRECIOUS entries
    /// STALE so a later pass can evict them. Bounded by `work_limit` per
    /// call for cooperative yielding.
    pub fn evict_if_over_capacity(&mut self, work_limit: usize) {
        if self.len() <= self.capacity {
            return;
        }
        let mut work = 0;
        for accession in self.ordered_accessions_ascending() {
            if work >= work_limit || self.len() <= self.capacity {
                break;
            }
            if let Some(entry) = self.get_entry(accession) {
                if entry.flags.has(flags::STALE) && !entry.flags.has(flags::PRECIOUS) {
                    self.remove(accession);
                    work += 1;
                }
            }
        }
        if self.len() <= self.capacity {
            return;
        }
        work = 0;
        for accession in self.ordered_accessions_ascending() {
            if work >= work_limit || self.len() <= self.capacity {
                break;
            }
            if let Some(entry) = self.get_entry_mut(accession) {
                if !entry.flags.has(flags::PRECIOUS) && !entry.flags.has(flags::STALE) {
                    entry.flags.set(flags::STALE);
                    work += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use udcn_common::hash;

    fn object(name: &str, content: &str) -> ContentObject {
        ContentObject::new(Name::from_str(name), Bytes::copy_from_slice(content.as_bytes()), [0u8; 32])
    }

    fn digest_for(object: &ContentObject) -> [u8; 32] {
        hash::digest(object.content.as_ref())
    }

    #[test]
    fn exactly_one_of_direct_or_straggler_and_always_in_skiplist() {
        let mut cs = ContentStore::new(1000);
        let mut rng = Rng48::new(1);
        for i in 0..50 {
            let obj = object(&format!("/a/{i}"), "x");
            let digest = digest_for(&obj);
            cs.insert(obj, digest, &mut rng);
        }
        for accession in 0..50 {
            assert!(cs.get_entry(accession).is_some());
        }
    }

    #[test]
    fn accessions_strictly_increase() {
        let mut cs = ContentStore::new(1000);
        let mut rng = Rng48::new(2);
        let mut last = None;
        for i in 0..20 {
            let obj = object(&format!("/b/{i}"), "y");
            let digest = digest_for(&obj);
            if let InsertOutcome::Inserted(acc) = cs.insert(obj, digest, &mut rng) {
                if let Some(prev) = last {
                    assert!(acc > prev);
                }
                last = Some(acc);
            }
        }
    }

    #[test]
    fn duplicate_insert_marks_fresh_and_does_not_allocate_new_accession() {
        let mut cs = ContentStore::new(1000);
        let mut rng = Rng48::new(3);
        let obj = object("/c", "z");
        let digest = digest_for(&obj);
        let first = cs.insert(obj.clone(), digest, &mut rng);
        let second = cs.insert(obj, digest, &mut rng);
        match (first, second) {
            (InsertOutcome::Inserted(a), InsertOutcome::Duplicate(b)) => assert_eq!(a, b),
            other => panic!("expected Inserted then Duplicate, got {other:?}"),
        }
    }

    #[test]
    fn empty_prefix_matches_every_name() {
        let mut cs = ContentStore::new(1000);
        let mut rng = Rng48::new(4);
        let obj = object("/a/b/c", "data");
        let digest = digest_for(&obj);
        cs.insert(obj, digest, &mut rng);

        let interest = Interest::new(Name::root());
        assert!(cs.find_match(&interest).is_some());
    }

    #[test]
    fn max_suffix_zero_requires_full_name_including_digest() {
        let mut cs = ContentStore::new(1000);
        let mut rng = Rng48::new(5);
        let obj = object("/d", "data");
        let digest = digest_for(&obj);
        cs.insert(obj.clone(), digest, &mut rng);

        let mut exact = Interest::new(obj.name.clone().with_component(NameComponent::implicit_digest(digest)));
        exact.selectors.max_suffix_components = Some(0);
        assert!(cs.find_match(&exact).is_some());

        let mut prefix_only = Interest::new(obj.name.clone());
        prefix_only.selectors.max_suffix_components = Some(0);
        assert!(cs.find_match(&prefix_only).is_none());
    }

    #[test]
    fn freshness_beyond_cap_schedules_no_timer() {
        assert_eq!(freshness_delay_us(Some(MAX_FRESHNESS_SECONDS + 1)), None);
        assert_eq!(freshness_delay_us(Some(MAX_FRESHNESS_SECONDS)), Some(MAX_FRESHNESS_SECONDS as u64 * 1_000_000));
    }

    #[test]
    fn eviction_prefers_stale_entries_first() {
        let mut cs = ContentStore::new(2);
        let mut rng = Rng48::new(6);
        for i in 0..3 {
            let obj = object(&format!("/e/{i}"), "v");
            let digest = digest_for(&obj);
            cs.insert(obj, digest, &mut rng);
        }
        if let Some(entry) = cs.get_entry_mut(0) {
            entry.flags.set(flags::STALE);
        }
        cs.evict_if_over_capacity(10);
        assert!(cs.get_entry(0).is_none());
        assert_eq!(cs.len(), 2);
    }
}
