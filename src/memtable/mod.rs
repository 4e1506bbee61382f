pub mod skiplist;

use tracing::debug;

use crate::bloom::BloomFilter;
use crate::dedup::DedupScanMap;
use crate::types::{FixedWidth, KVPair};

pub use skiplist::MemTableRun;

/// A sorted, mutable in-memory run.
///
/// Keys are unique within a run; a second insert of the same key overwrites
/// its value in place. Values are stored as given, tombstones included;
/// interpreting them is the caller's job.
pub trait Run<K: FixedWidth, V: FixedWidth> {
    /// Insert or overwrite a key.
    fn insert(&mut self, key: K, value: V);

    /// Physically remove a key. Returns false if it was absent.
    fn delete(&mut self, key: K) -> bool;

    /// The stored value for `key`, if present.
    fn lookup(&self, key: K) -> Option<V>;

    /// All pairs with `lo <= key < hi` in ascending key order.
    fn range(&self, lo: K, hi: K) -> Vec<KVPair<K, V>>;

    /// Consume the run, returning every pair in ascending key order.
    fn drain(self) -> Vec<KVPair<K, V>>
    where
        Self: Sized;

    fn len(&self) -> usize;

    /// Whether the element count reached the configured threshold.
    fn is_full(&self) -> bool;

    /// Smallest and largest key observed, `None` while empty.
    fn bounds(&self) -> Option<(K, K)>;
}

/// A memtable run together with its bloom filter.
pub struct BufferedRun<K, V> {
    pub run: MemTableRun<K, V>,
    pub filter: BloomFilter,
}

impl<K: FixedWidth, V: FixedWidth> BufferedRun<K, V> {
    fn new(elements_per_run: usize, false_positive_rate: f64) -> Self {
        BufferedRun {
            run: MemTableRun::new(elements_per_run),
            filter: BloomFilter::new(elements_per_run, false_positive_rate),
        }
    }

    /// Bounds and bloom check: false means `key` is certainly not here.
    fn may_contain(&self, key: K) -> bool {
        match self.run.bounds() {
            Some((min, max)) if key >= min && key <= max => {
                key.with_bytes(|bytes| self.filter.may_contain(bytes))
            }
            _ => false,
        }
    }
}

/// The in-memory write buffer: a fixed number of run slots.
///
/// Inserts go to the active slot. When it fills, the next slot becomes
/// active; once every slot is full the buffer must be flushed before it
/// accepts another insert. Slot index orders recency: higher is newer.
///
/// ```text
///  slot:    0        1        2        3
///         [full]  [full]  [active]  [empty]
///          oldest                    newest
/// ```
pub struct MemTable<K, V> {
    slots: Vec<BufferedRun<K, V>>,
    active: usize,
    elements_per_run: usize,
    false_positive_rate: f64,
}

impl<K: FixedWidth, V: FixedWidth> MemTable<K, V> {
    /// Create a buffer of `num_runs` empty runs.
    pub fn new(num_runs: usize, elements_per_run: usize, false_positive_rate: f64) -> Self {
        let slots = (0..num_runs)
            .map(|_| BufferedRun::new(elements_per_run, false_positive_rate))
            .collect();
        MemTable {
            slots,
            active: 0,
            elements_per_run,
            false_positive_rate,
        }
    }

    /// Whether the next insert needs a flush first.
    ///
    /// Advances the active slot past a full run as a side effect.
    pub fn needs_flush(&mut self) -> bool {
        if self.active < self.slots.len() && self.slots[self.active].run.is_full() {
            self.active += 1;
        }
        self.active >= self.slots.len()
    }

    /// Write into the active run and its filter.
    ///
    /// Callers must check `needs_flush` first.
    pub fn insert(&mut self, key: K, value: V) {
        let slot = &mut self.slots[self.active];
        slot.run.insert(key, value);
        key.with_bytes(|bytes| slot.filter.insert(bytes));
    }

    /// Newest-first point lookup. Returns the stored value, tombstone included.
    pub fn lookup(&self, key: K) -> Option<V> {
        self.populated()
            .rev()
            .filter(|slot| slot.may_contain(key))
            .find_map(|slot| slot.run.lookup(key))
    }

    /// Feed every pair in `[lo, hi)` into `seen`, newest run first.
    ///
    /// Pairs whose key was already claimed by a newer run are skipped; live
    /// winners are appended to `out`.
    pub fn scan_into(
        &self,
        lo: K,
        hi: K,
        seen: &mut DedupScanMap<K, V>,
        out: &mut Vec<KVPair<K, V>>,
    ) {
        for slot in self.populated().rev() {
            for pair in slot.run.range(lo, hi) {
                if seen.put_if_absent(pair.key, pair.value).is_none() && !pair.is_tombstone() {
                    out.push(pair);
                }
            }
        }
    }

    /// Remove the `count` oldest runs and refill the buffer with fresh ones.
    ///
    /// The evicted runs are returned oldest first. The active slot moves
    /// down by `count` so inserts continue where they left off.
    pub fn evict_oldest(&mut self, count: usize) -> Vec<BufferedRun<K, V>> {
        let num_runs = self.slots.len();
        let count = count.min(num_runs);
        let evicted: Vec<_> = self.slots.drain(..count).collect();
        while self.slots.len() < num_runs {
            self.slots
                .push(BufferedRun::new(self.elements_per_run, self.false_positive_rate));
        }
        self.active = self.active.saturating_sub(count);
        debug!(
            evicted = count,
            entries = evicted.iter().map(|slot| slot.run.len()).sum::<usize>(),
            active = self.active,
            "evicted memtable runs"
        );
        evicted
    }

    /// Entries held across all runs, tombstones included.
    pub fn len(&self) -> usize {
        self.slots.iter().map(|slot| slot.run.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of run slots that hold at least one entry.
    pub fn populated_runs(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.run.is_empty()).count()
    }

    /// Index of the run receiving inserts.
    pub fn active(&self) -> usize {
        self.active
    }

    pub fn num_runs(&self) -> usize {
        self.slots.len()
    }

    /// Slots 0..=active, the only ones that can hold data.
    fn populated(&self) -> impl DoubleEndedIterator<Item = &BufferedRun<K, V>> {
        let end = (self.active + 1).min(self.slots.len());
        self.slots[..end].iter()
    }
}
