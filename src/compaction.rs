use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::dedup::DedupScanMap;
use crate::disk::DiskLevel;
use crate::error::{Error, Result};
use crate::memtable::{BufferedRun, Run};
use crate::options::Options;
use crate::types::{FixedWidth, KVPair};

/// The on-disk part of the tree: disk levels ordered shallow (newest) to deep.
///
/// Levels are materialized lazily. Level 0 exists from the start; level L+1
/// is created the first time level L overflows, with runs
/// `merge_size(L)` times larger than those of level L.
pub struct DiskTiers<K, V> {
    dir: PathBuf,
    page_size: usize,
    disk_runs_per_level: usize,
    level_merge_size: usize,
    false_positive_rate: f64,
    levels: Vec<DiskLevel<K, V>>,
    /// Index of the deepest materialized level.
    deepest: usize,
}

impl<K: FixedWidth, V: FixedWidth> DiskTiers<K, V> {
    /// Create the tier set with an empty level 0.
    pub fn new(options: &Options) -> Result<Self> {
        let level_merge_size = options.level_merge_size();
        let level0 = DiskLevel::new(
            &options.dir,
            0,
            options.page_size,
            options.level0_run_size(),
            options.disk_runs_per_level,
            level_merge_size,
            options.bloom_false_positive_rate,
        )?;
        Ok(DiskTiers {
            dir: options.dir.clone(),
            page_size: options.page_size,
            disk_runs_per_level: options.disk_runs_per_level,
            level_merge_size,
            false_positive_rate: options.bloom_false_positive_rate,
            levels: vec![level0],
            deepest: 0,
        })
    }

    /// Write one flushed batch into level 0, cascading first if it is full.
    pub fn flush_batch(&mut self, batch: &[KVPair<K, V>]) -> Result<()> {
        if self.levels[0].is_full() {
            self.cascade(0)?;
        }
        self.levels[0].add_sorted_run(batch)
    }

    /// Make room in level `src` by merging its oldest runs into `src + 1`.
    ///
    /// Materializes `src + 1` if `src` is the deepest level, and recurses
    /// first if `src + 1` is itself full. Depth is bounded by the level
    /// count, which grows logarithmically with the data.
    pub fn cascade(&mut self, src: usize) -> Result<()> {
        if src == self.deepest {
            self.materialize_below(src)?;
        }
        let dst = src + 1;
        if self.levels[dst].is_full() {
            self.cascade(dst)?;
        }

        let is_last_level = dst == self.deepest && self.levels[dst].is_empty();
        debug!(src, dst, is_last_level, "cascading level");

        let (upper, lower) = self.levels.split_at_mut(dst);
        let source = &mut upper[src];
        let target = &mut lower[0];
        let sources = source.runs_to_merge();
        let merged = sources.len();
        target.merge_runs(sources, source.run_size(), is_last_level)?;
        source.retire_merged(merged)
    }

    fn materialize_below(&mut self, src: usize) -> Result<()> {
        let parent = &self.levels[src];
        let run_size = parent.run_size() * parent.merge_size();
        let level = DiskLevel::new(
            &self.dir,
            src + 1,
            self.page_size,
            run_size,
            self.disk_runs_per_level,
            self.level_merge_size,
            self.false_positive_rate,
        )?;
        info!(level = src + 1, run_size, "materialized disk level");
        self.levels.push(level);
        self.deepest = self.levels.len() - 1;
        Ok(())
    }

    /// Shallow-to-deep point lookup. Returns the stored value, tombstone included.
    pub fn lookup(&self, key: K) -> Result<Option<V>> {
        for level in &self.levels {
            if let Some(value) = level.lookup(key)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Shallow-to-deep range scan into a shared dedup map.
    pub fn scan_into(
        &self,
        lo: K,
        hi: K,
        seen: &mut DedupScanMap<K, V>,
        out: &mut Vec<KVPair<K, V>>,
    ) -> Result<()> {
        self.levels
            .iter()
            .try_for_each(|level| level.scan_into(lo, hi, seen, out))
    }

    pub fn levels(&self) -> &[DiskLevel<K, V>] {
        &self.levels
    }

    pub fn deepest(&self) -> usize {
        self.deepest
    }
}

/// Concatenate evicted runs into one sorted batch with one entry per key.
///
/// Runs are given oldest first. They are laid out newest first so that the
/// stable sort keeps the newest copy of every key at the head of its group,
/// and `dedup_by_key` keeps exactly that copy.
pub fn sort_newest_wins<K: FixedWidth, V: FixedWidth>(
    runs: Vec<BufferedRun<K, V>>,
) -> Vec<KVPair<K, V>> {
    let total = runs.iter().map(|slot| slot.run.len()).sum();
    let mut batch = Vec::with_capacity(total);
    for slot in runs.into_iter().rev() {
        batch.extend(slot.run.drain());
    }
    batch.sort_by_key(|pair| pair.key);
    batch.dedup_by_key(|pair| pair.key);
    batch
}

/// Move evicted memtable runs onto disk level 0.
///
/// The full "level 0 full? → cascade → write" sequence runs under the tier
/// lock, so at most one merge mutates disk levels at a time.
pub fn merge_routine<K: FixedWidth, V: FixedWidth>(
    runs: Vec<BufferedRun<K, V>>,
    tiers: &Mutex<DiskTiers<K, V>>,
) -> Result<()> {
    let sources = runs.len();
    let batch = sort_newest_wins(runs);
    debug!(sources, entries = batch.len(), "flushing memtable runs");

    let mut tiers = tiers.lock();
    tiers.flush_batch(&batch)
}

/// Handle to the one outstanding background compaction.
///
/// Readers call `wait` before touching disk levels; a new flush waits for
/// the previous one first. A started compaction always runs to completion.
pub struct Compaction {
    handle: JoinHandle<Result<()>>,
}

impl Compaction {
    /// Run `merge_routine` on a dedicated thread.
    pub fn spawn<K: FixedWidth, V: FixedWidth>(
        runs: Vec<BufferedRun<K, V>>,
        tiers: Arc<Mutex<DiskTiers<K, V>>>,
    ) -> Result<Self> {
        let handle = thread::Builder::new()
            .name("lsm-compaction".into())
            .spawn(move || {
                let result = merge_routine(runs, &tiers);
                if let Err(e) = &result {
                    error!(error = %e, "background compaction failed");
                }
                result
            })?;
        Ok(Compaction { handle })
    }

    /// Block until the compaction finishes and return its outcome.
    pub fn wait(self) -> Result<()> {
        self.handle.join().map_err(|_| {
            error!("background compaction panicked");
            Error::CompactionPanicked
        })?
    }
}
