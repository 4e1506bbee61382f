use crate::bloom::BloomFilter;
use crate::types::FixedWidth;

/// Builds the bloom filter of a disk run while its records are read back.
///
/// Usage when sealing a run:
/// 1. Create a builder with the run's record count
/// 2. Call add_key() for every key in the run
/// 3. Call build() to get the finished BloomFilter
pub struct BloomFilterBuilder {
    filter: BloomFilter,
    added: usize,
}

impl BloomFilterBuilder {
    /// Create a builder expecting approximately `estimated_keys` keys.
    ///
    /// An empty run still gets a (minimal) filter, so zero is clamped to one.
    pub fn new(estimated_keys: usize, false_positive_rate: f64) -> Self {
        BloomFilterBuilder {
            filter: BloomFilter::new(estimated_keys.max(1), false_positive_rate),
            added: 0,
        }
    }

    /// Add a typed key to the bloom filter being built.
    pub fn add_key<K: FixedWidth>(&mut self, key: K) {
        key.with_bytes(|bytes| self.filter.insert(bytes));
        self.added += 1;
    }

    /// Number of keys added so far.
    pub fn added(&self) -> usize {
        self.added
    }

    /// Finalize and return the bloom filter.
    pub fn build(self) -> BloomFilter {
        self.filter
    }
}
