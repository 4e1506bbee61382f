use xxhash_rust::xxh3::xxh3_64;

use crate::types::{FixedWidth, KVPair};

const MIN_SLOTS: usize = 16;

/// Scratch map for last-write-wins de-duplication during a range scan.
///
/// A scan visits runs newest first, so the first value recorded for a key is
/// the winning one; every later sighting is shadowed. The map only needs
/// "insert if absent" and lookup, which an open-addressed table with linear
/// probing does without per-entry allocation.
///
/// The table size is a power of two and doubles whenever it would become
/// more than half full.
pub struct DedupScanMap<K, V> {
    slots: Vec<Option<KVPair<K, V>>>,
    len: usize,
}

impl<K: FixedWidth, V: FixedWidth> DedupScanMap<K, V> {
    /// Create a map that holds `hint` keys before its first resize.
    pub fn with_capacity(hint: usize) -> Self {
        let slots = (hint.saturating_mul(2)).next_power_of_two().max(MIN_SLOTS);
        DedupScanMap {
            slots: vec![None; slots],
            len: 0,
        }
    }

    /// Record `value` for `key` unless the key is already present.
    ///
    /// Returns `None` if the pair was inserted, or the value already held
    /// for the key (which is left unchanged).
    pub fn put_if_absent(&mut self, key: K, value: V) -> Option<V> {
        let mut free = match self.probe(key) {
            Ok(existing) => return Some(existing.value),
            Err(free) => free,
        };
        if (self.len + 1) * 2 > self.slots.len() {
            self.grow();
            // Slot positions moved with the resize.
            if let Err(slot) = self.probe(key) {
                free = slot;
            }
        }
        self.slots[free] = Some(KVPair::new(key, value));
        self.len += 1;
        None
    }

    pub fn get(&self, key: K) -> Option<V> {
        self.probe(key).ok().map(|pair| pair.value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `Ok(pair)` if `key` is present, otherwise `Err(index)` of the empty
    /// slot that ends its probe sequence.
    fn probe(&self, key: K) -> Result<KVPair<K, V>, usize> {
        let mask = self.slots.len() - 1;
        let mut index = Self::hash(key) & mask;
        loop {
            match self.slots[index] {
                None => return Err(index),
                Some(pair) if pair.key == key => return Ok(pair),
                Some(_) => index = (index + 1) & mask,
            }
        }
    }

    fn grow(&mut self) {
        let doubled = vec![None; self.slots.len() * 2];
        let old = std::mem::replace(&mut self.slots, doubled);
        for pair in old.into_iter().flatten() {
            if let Err(free) = self.probe(pair.key) {
                self.slots[free] = Some(pair);
            }
        }
    }

    fn hash(key: K) -> usize {
        key.with_bytes(xxh3_64) as usize
    }
}
