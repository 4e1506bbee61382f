use std::path::{Path, PathBuf};

use tracing::debug;

use crate::dedup::DedupScanMap;
use crate::disk::run::DiskRun;
use crate::error::{Error, Result};
use crate::iterator::{MergeIterator, StorageIterator};
use crate::types::{FixedWidth, KVPair};

/// Records buffered before each write while streaming a merge into a run.
const MERGE_CHUNK: usize = 1024;

/// One tier of the on-disk tree: a fixed number of run slots.
///
/// Slots fill from index 0 upward, so the slot index orders recency (higher
/// is newer). When the level is full, its `merge_size` oldest runs are merged
/// into one run of the level below and the survivors slide down to the
/// front:
///
/// ```text
/// before:  [r0 r1 r2 r3]   merge_size = 2, r0 + r1 → next level
/// after:   [r2 r3 __ __]   r2, r3 renumbered to slots 0, 1
/// ```
///
/// Every slot always holds a `DiskRun`; unpopulated ones are empty shells
/// waiting to be written.
pub struct DiskLevel<K, V> {
    dir: PathBuf,
    level: usize,
    page_size: usize,
    /// Records per run at this depth.
    run_size: usize,
    num_runs: usize,
    /// Oldest runs consumed per downward merge.
    merge_size: usize,
    false_positive_rate: f64,
    runs: Vec<DiskRun<K, V>>,
    /// Next free slot; slots below it are populated.
    active: usize,
}

impl<K: FixedWidth, V: FixedWidth> DiskLevel<K, V> {
    /// Create a level and the empty run shells for all of its slots.
    pub fn new(
        dir: &Path,
        level: usize,
        page_size: usize,
        run_size: usize,
        num_runs: usize,
        merge_size: usize,
        false_positive_rate: f64,
    ) -> Result<Self> {
        let runs = (0..num_runs)
            .map(|slot| DiskRun::create(dir, level, slot, run_size, page_size, false_positive_rate))
            .collect::<Result<Vec<_>>>()?;
        Ok(DiskLevel {
            dir: dir.to_path_buf(),
            level,
            page_size,
            run_size,
            num_runs,
            merge_size,
            false_positive_rate,
            runs,
            active: 0,
        })
    }

    /// Write an already sorted, de-duplicated batch into the next free slot.
    ///
    /// This is how a memtable flush lands on disk. An empty batch leaves the
    /// level untouched.
    pub fn add_sorted_run(&mut self, pairs: &[KVPair<K, V>]) -> Result<()> {
        if self.is_full() {
            return Err(Error::ContractViolation(format!(
                "level {} is full, cannot add a run",
                self.level
            )));
        }
        if pairs.len() > self.run_size {
            return Err(Error::ContractViolation(format!(
                "batch of {} records exceeds run size {} of level {}",
                pairs.len(),
                self.run_size,
                self.level
            )));
        }
        if pairs.is_empty() {
            return Ok(());
        }

        let run = &mut self.runs[self.active];
        run.write(pairs, 0)?;
        run.build_index()?;
        self.active += 1;
        Ok(())
    }

    /// K-way merge `sources` (oldest first) into the next free slot.
    ///
    /// Equal keys resolve to the value from the highest source index. With
    /// `is_last_level` set, tombstones are dropped: no older level remains
    /// that they would need to shadow. Returns the number of records written;
    /// a merge that produces nothing leaves the slot empty.
    pub fn merge_runs(
        &mut self,
        sources: &[DiskRun<K, V>],
        run_len: usize,
        is_last_level: bool,
    ) -> Result<usize> {
        if self.is_full() {
            return Err(Error::ContractViolation(format!(
                "level {} is full, cannot merge into it",
                self.level
            )));
        }
        if let Some(run) = sources.iter().find(|run| run.len() > run_len) {
            return Err(Error::ContractViolation(format!(
                "source run {} holds {} records, expected at most {run_len}",
                run.path().display(),
                run.len()
            )));
        }
        if sources.len() * run_len > self.run_size {
            return Err(Error::ContractViolation(format!(
                "{} runs of {run_len} records do not fit run size {} of level {}",
                sources.len(),
                self.run_size,
                self.level
            )));
        }

        let cursors = sources
            .iter()
            .map(DiskRun::iter)
            .collect::<Result<Vec<_>>>()?;
        let mut merged = MergeIterator::new(cursors)?;

        let target = &mut self.runs[self.active];
        let mut chunk = Vec::with_capacity(MERGE_CHUNK);
        let mut written = 0usize;
        let mut dropped = 0usize;
        while merged.is_valid() {
            let pair = KVPair::new(merged.key(), merged.value());
            if is_last_level && pair.is_tombstone() {
                dropped += 1;
            } else {
                chunk.push(pair);
                if chunk.len() == MERGE_CHUNK {
                    target.write(&chunk, written)?;
                    written += chunk.len();
                    chunk.clear();
                }
            }
            merged.next()?;
        }
        if !chunk.is_empty() {
            target.write(&chunk, written)?;
            written += chunk.len();
        }

        target.truncate(written)?;
        target.build_index()?;
        if written > 0 {
            self.active += 1;
        }

        debug!(
            level = self.level,
            sources = sources.len(),
            records_in = sources.iter().map(DiskRun::len).sum::<usize>(),
            records_out = written,
            tombstones_dropped = dropped,
            is_last_level,
            "merged runs into level"
        );
        Ok(written)
    }

    /// The `merge_size` oldest runs, consumed by the next downward merge.
    pub fn runs_to_merge(&self) -> &[DiskRun<K, V>] {
        &self.runs[..self.merge_size.min(self.active)]
    }

    /// Release the `count` oldest runs after they were merged downward.
    ///
    /// Survivors are moved to the front and renumbered (their files renamed),
    /// and fresh empty shells bring the level back to its slot count.
    pub fn retire_merged(&mut self, count: usize) -> Result<()> {
        if count != self.merge_size || count > self.active {
            return Err(Error::ContractViolation(format!(
                "retiring {count} runs from level {} (merge size {}, {} populated)",
                self.level, self.merge_size, self.active
            )));
        }

        for run in self.runs.drain(..count) {
            run.remove()?;
        }
        for (slot, run) in self.runs.iter_mut().enumerate() {
            run.rename_slot(slot)?;
        }
        self.active -= count;

        while self.runs.len() < self.num_runs {
            let slot = self.runs.len();
            self.runs.push(DiskRun::create(
                &self.dir,
                self.level,
                slot,
                self.run_size,
                self.page_size,
                self.false_positive_rate,
            )?);
        }

        debug!(level = self.level, retired = count, remaining = self.active, "retired merged runs");
        Ok(())
    }

    /// Newest-first point lookup. Returns the stored value, tombstone included.
    pub fn lookup(&self, key: K) -> Result<Option<V>> {
        for run in self.populated().iter().rev() {
            if !run.may_contain(key) {
                continue;
            }
            if let Some(value) = run.lookup(key)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Feed every record in `[lo, hi)` into `seen`, newest run first.
    ///
    /// Records whose key was already claimed by something newer are skipped;
    /// live winners are appended to `out`.
    pub fn scan_into(
        &self,
        lo: K,
        hi: K,
        seen: &mut DedupScanMap<K, V>,
        out: &mut Vec<KVPair<K, V>>,
    ) -> Result<()> {
        for run in self.populated().iter().rev() {
            match run.bounds() {
                Some((min, max)) if hi > min && lo <= max => {}
                _ => continue,
            }
            let (start, end) = run.range(lo, hi)?;
            for pair in run.read_range(start, end)? {
                if seen.put_if_absent(pair.key, pair.value).is_none() && !pair.is_tombstone() {
                    out.push(pair);
                }
            }
        }
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.active == self.num_runs
    }

    pub fn is_empty(&self) -> bool {
        self.active == 0
    }

    /// Records held across populated runs, tombstones included.
    pub fn len(&self) -> usize {
        self.populated().iter().map(DiskRun::len).sum()
    }

    /// Number of populated runs.
    pub fn run_count(&self) -> usize {
        self.active
    }

    pub fn run_size(&self) -> usize {
        self.run_size
    }

    pub fn merge_size(&self) -> usize {
        self.merge_size
    }

    pub fn num_runs(&self) -> usize {
        self.num_runs
    }

    pub fn level(&self) -> usize {
        self.level
    }

    /// Populated runs, oldest first.
    pub fn populated(&self) -> &[DiskRun<K, V>] {
        &self.runs[..self.active]
    }
}
