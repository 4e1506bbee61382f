use std::fs;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info};

use crate::compaction::{Compaction, DiskTiers, merge_routine};
use crate::dedup::DedupScanMap;
use crate::error::{Error, Result};
use crate::memtable::MemTable;
use crate::options::Options;
use crate::types::FixedWidth;

/// Per-level entry counts reported by [`DB::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelStats {
    pub level: usize,
    /// Populated run slots.
    pub runs: usize,
    /// Records held, tombstones included.
    pub entries: usize,
    /// Record capacity of each run at this depth.
    pub run_size: usize,
}

/// Snapshot of how many entries each tier holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    /// Entries in the memtable, tombstones included.
    pub buffer_entries: usize,
    /// Memtable runs holding at least one entry.
    pub buffer_runs: usize,
    pub levels: Vec<LevelStats>,
}

impl Stats {
    pub fn disk_entries(&self) -> usize {
        self.levels.iter().map(|level| level.entries).sum()
    }

    pub fn total_entries(&self) -> usize {
        self.buffer_entries + self.disk_entries()
    }
}

/// The storage engine.
///
/// Writes go to the memtable. When every memtable run is full, the oldest
/// share of them is flushed to disk level 0, on a background thread unless
/// `background_compaction` is off. Reads check the memtable newest to oldest,
/// then wait for any flush in progress and check the disk levels shallow to
/// deep.
///
/// ```no_run
/// use skiplsm::{DB, Options};
///
/// let mut db: DB<i64, i64> = DB::open(Options::new("/tmp/skiplsm"))?;
/// db.insert(7, 70)?;
/// assert_eq!(db.lookup(7)?, Some(70));
/// db.delete(7)?;
/// assert_eq!(db.lookup(7)?, None);
/// # Ok::<(), skiplsm::Error>(())
/// ```
pub struct DB<K: FixedWidth, V: FixedWidth> {
    options: Options,
    memtable: MemTable<K, V>,
    disk: Arc<Mutex<DiskTiers<K, V>>>,
    /// The one outstanding background flush, if any.
    compaction: Option<Compaction>,
    /// Memtable runs evicted per flush.
    merge_size: usize,
    /// Set once a flush or merge fails. Disk levels may be half merged, so
    /// every later call returns it.
    failure: Option<String>,
}

impl<K: FixedWidth, V: FixedWidth> DB<K, V> {
    /// Create an empty engine whose run files live in `options.dir`.
    ///
    /// Existing run files in the directory are overwritten, not recovered.
    pub fn open(options: Options) -> Result<Self> {
        options.validate()?;
        fs::create_dir_all(&options.dir)?;

        let disk = DiskTiers::new(&options)?;
        let memtable = MemTable::new(
            options.memtable_runs,
            options.elements_per_run,
            options.bloom_false_positive_rate,
        );
        let merge_size = options.memtable_merge_size();

        info!(
            dir = %options.dir.display(),
            elements_per_run = options.elements_per_run,
            memtable_runs = options.memtable_runs,
            merge_fraction = options.merge_fraction,
            bloom_false_positive_rate = options.bloom_false_positive_rate,
            page_size = options.page_size,
            disk_runs_per_level = options.disk_runs_per_level,
            background_compaction = options.background_compaction,
            "opened engine"
        );

        Ok(DB {
            options,
            memtable,
            disk: Arc::new(Mutex::new(disk)),
            compaction: None,
            merge_size,
            failure: None,
        })
    }

    /// Insert or overwrite `key`.
    ///
    /// `K::MIN`, `K::MAX` and `V::MIN` are reserved and rejected.
    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        if key == K::MIN || key == K::MAX {
            return Err(Error::ReservedKey);
        }
        if value == V::MIN {
            return Err(Error::ReservedValue);
        }
        self.write(key, value)
    }

    /// Logically delete `key` by writing a tombstone over it.
    pub fn delete(&mut self, key: K) -> Result<()> {
        if key == K::MIN || key == K::MAX {
            return Err(Error::ReservedKey);
        }
        self.write(key, V::MIN)
    }

    fn write(&mut self, key: K, value: V) -> Result<()> {
        self.ensure_usable()?;
        if self.memtable.needs_flush() {
            self.flush()?;
        }
        self.memtable.insert(key, value);
        Ok(())
    }

    /// Insert every pair in order.
    pub fn bulk_load<I>(&mut self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        pairs
            .into_iter()
            .try_for_each(|(key, value)| self.insert(key, value))
    }

    /// The live value of `key`, or `None` if it is absent or deleted.
    pub fn lookup(&mut self, key: K) -> Result<Option<V>> {
        self.ensure_usable()?;
        if let Some(value) = self.memtable.lookup(key) {
            return Ok(live(value));
        }
        self.await_compaction()?;
        let stored = self.disk.lock().lookup(key)?;
        Ok(stored.and_then(live))
    }

    /// Every live pair with `lo <= key < hi`, in ascending key order.
    pub fn range(&mut self, lo: K, hi: K) -> Result<Vec<(K, V)>> {
        self.ensure_usable()?;
        if hi <= lo {
            return Ok(Vec::new());
        }

        let mut seen = DedupScanMap::with_capacity(self.memtable.len());
        let mut found = Vec::new();
        self.memtable.scan_into(lo, hi, &mut seen, &mut found);

        self.await_compaction()?;
        self.disk.lock().scan_into(lo, hi, &mut seen, &mut found)?;

        found.sort_unstable_by_key(|pair| pair.key);
        Ok(found.into_iter().map(|pair| (pair.key, pair.value)).collect())
    }

    /// Number of live keys in the whole engine.
    ///
    /// Scans every tier, so its cost grows with the data.
    pub fn live_count(&mut self) -> Result<usize> {
        Ok(self.range(K::MIN, K::MAX)?.len())
    }

    /// Entries in the memtable, tombstones included.
    pub fn buffer_len(&self) -> usize {
        self.memtable.len()
    }

    /// Block until the outstanding background flush, if any, finishes.
    ///
    /// An error raised by that flush is returned here, and the engine
    /// refuses all later work with [`Error::EngineFailed`].
    pub fn await_compaction(&mut self) -> Result<()> {
        self.ensure_usable()?;
        match self.compaction.take() {
            Some(compaction) => {
                let result = compaction.wait();
                self.record(result)
            }
            None => Ok(()),
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        match &self.failure {
            Some(cause) => Err(Error::EngineFailed(cause.clone())),
            None => Ok(()),
        }
    }

    /// Remember a failed flush so that later calls see it too.
    fn record(&mut self, result: Result<()>) -> Result<()> {
        if let Err(e) = &result {
            error!(error = %e, "engine disabled after storage failure");
            self.failure = Some(e.to_string());
        }
        result
    }

    /// Entry counts per tier, after any outstanding flush has landed.
    pub fn stats(&mut self) -> Result<Stats> {
        self.await_compaction()?;
        let disk = self.disk.lock();
        let levels = disk
            .levels()
            .iter()
            .map(|level| LevelStats {
                level: level.level(),
                runs: level.run_count(),
                entries: level.len(),
                run_size: level.run_size(),
            })
            .collect();
        Ok(Stats {
            buffer_entries: self.memtable.len(),
            buffer_runs: self.memtable.populated_runs(),
            levels,
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Evict the oldest memtable runs and merge them into disk level 0.
    ///
    /// A previous background flush must finish first; if it failed, nothing
    /// is evicted. The memtable is refilled before the merge starts, so
    /// inserts resume at once.
    fn flush(&mut self) -> Result<()> {
        self.await_compaction()?;
        let runs = self.memtable.evict_oldest(self.merge_size);

        if self.options.background_compaction {
            let spawned = Compaction::spawn(runs, Arc::clone(&self.disk));
            match spawned {
                Ok(compaction) => {
                    self.compaction = Some(compaction);
                    Ok(())
                }
                Err(e) => self.record(Err(e)),
            }
        } else {
            let result = merge_routine(runs, &self.disk);
            self.record(result)
        }
    }
}

impl<K: FixedWidth, V: FixedWidth> Drop for DB<K, V> {
    fn drop(&mut self) {
        if let Some(compaction) = self.compaction.take() {
            if let Err(e) = compaction.wait() {
                error!(error = %e, "compaction outstanding at shutdown failed");
            }
        }
    }
}

/// Map a stored value to what readers see.
fn live<V: FixedWidth>(value: V) -> Option<V> {
    if value == V::MIN { None } else { Some(value) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KVPair;

    #[test]
    fn live_hides_tombstones() {
        assert_eq!(live(5i64), Some(5));
        assert_eq!(live(i64::MIN), None);
        assert!(KVPair::<i64, i64>::tombstone(1).is_tombstone());
    }
}
