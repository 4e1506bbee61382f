pub mod merge;

use crate::error::Result;

pub use merge::MergeIterator;

/// The central iteration abstraction over sorted on-disk data.
///
/// Disk run cursors and the merged view both implement this trait, so the
/// k-way merge takes any set of sorted sources. `next` is fallible because
/// advancing may read from a run file.
pub trait StorageIterator<K, V> {
    /// Returns the current key. Only valid when is_valid() is true.
    fn key(&self) -> K;

    /// Returns the current value. Only valid when is_valid() is true.
    fn value(&self) -> V;

    /// Returns true if the iterator is positioned at a valid entry.
    fn is_valid(&self) -> bool;

    /// Advances to the next entry. Returns error on IO failure.
    fn next(&mut self) -> Result<()>;
}
