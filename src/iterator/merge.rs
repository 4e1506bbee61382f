use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::types::FixedWidth;

/// Heap slot: the current key of one source.
///
/// `BinaryHeap` is a max-heap, so the ordering is inverted on the key: the
/// smallest key sits on top, and among equal keys the highest source index
/// (the newest run) wins.
struct HeapEntry<K> {
    key: K,
    source: usize,
}

impl<K: Ord> PartialEq for HeapEntry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K: Ord> Eq for HeapEntry<K> {}

impl<K: Ord> PartialOrd for HeapEntry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord> Ord for HeapEntry<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(&self.key)
            .then(self.source.cmp(&other.source))
    }
}

/// Merges multiple sorted sources into a single sorted stream.
///
/// Used by compaction to fold the oldest runs of a level into one run of the
/// level below. The heap holds at most one entry per source, so memory is
/// bounded by the number of runs being merged, not their size.
///
/// Ordering guarantee: keys come out ascending, exactly once each.
/// Deduplication: sources are ordered oldest (index 0) to newest; when several
/// hold the same key, the value from the highest index is yielded and the
/// others are skipped. Tombstones are yielded like any other value.
pub struct MergeIterator<K, V, I> {
    sources: Vec<I>,
    heap: BinaryHeap<HeapEntry<K>>,
    current: Option<(K, V)>,
}

impl<K, V, I> MergeIterator<K, V, I>
where
    K: FixedWidth,
    V: FixedWidth,
    I: StorageIterator<K, V>,
{
    /// Create a new MergeIterator, positioned at the smallest key.
    pub fn new(sources: Vec<I>) -> Result<Self> {
        let heap = sources
            .iter()
            .enumerate()
            .filter(|(_, source)| source.is_valid())
            .map(|(source, iter)| HeapEntry {
                key: iter.key(),
                source,
            })
            .collect();
        let mut merged = MergeIterator {
            sources,
            heap,
            current: None,
        };
        merged.advance()?;
        Ok(merged)
    }

    /// Pop the winner for the smallest key and step past every shadowed copy.
    fn advance(&mut self) -> Result<()> {
        let Some(top) = self.heap.pop() else {
            self.current = None;
            return Ok(());
        };
        self.current = Some((top.key, self.sources[top.source].value()));
        self.step(top.source)?;

        while self.heap.peek().is_some_and(|entry| entry.key == top.key) {
            if let Some(shadowed) = self.heap.pop() {
                self.step(shadowed.source)?;
            }
        }
        Ok(())
    }

    fn step(&mut self, source: usize) -> Result<()> {
        let iter = &mut self.sources[source];
        iter.next()?;
        if iter.is_valid() {
            self.heap.push(HeapEntry {
                key: iter.key(),
                source,
            });
        }
        Ok(())
    }
}

impl<K, V, I> StorageIterator<K, V> for MergeIterator<K, V, I>
where
    K: FixedWidth,
    V: FixedWidth,
    I: StorageIterator<K, V>,
{
    fn key(&self) -> K {
        self.current.map(|(key, _)| key).unwrap_or(K::MAX)
    }

    fn value(&self) -> V {
        self.current.map(|(_, value)| value).unwrap_or(V::MIN)
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<()> {
        self.advance()
    }
}
