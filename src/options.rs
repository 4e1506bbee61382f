use std::path::PathBuf;

use crate::error::{Error, Result};

/// Construction parameters of the engine.
///
/// Defaults match a mid-sized buffer: 20 runs of 800 entries, full-buffer
/// flushes, 0.1% bloom filters, 1024-record fence pages and 20 runs per disk
/// level.
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory holding the run files. Created on open.
    pub dir: PathBuf,
    /// Entries per memtable run before the next slot becomes active.
    pub elements_per_run: usize,
    /// Number of memtable run slots.
    pub memtable_runs: usize,
    /// Share of slots flushed per cycle, rounded up. Also the share of a
    /// disk level's runs merged downward.
    pub merge_fraction: f64,
    /// Target false-positive probability of every bloom filter.
    pub bloom_false_positive_rate: f64,
    /// Records per fence-pointer page.
    pub page_size: usize,
    /// Run slots per disk level.
    pub disk_runs_per_level: usize,
    /// Run flushes on a background thread instead of the caller's.
    pub background_compaction: bool,
}

impl Options {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Options {
            dir: dir.into(),
            elements_per_run: 800,
            memtable_runs: 20,
            merge_fraction: 1.0,
            bloom_false_positive_rate: 0.001,
            page_size: 1024,
            disk_runs_per_level: 20,
            background_compaction: true,
        }
    }

    pub fn elements_per_run(mut self, n: usize) -> Self {
        self.elements_per_run = n;
        self
    }

    pub fn memtable_runs(mut self, n: usize) -> Self {
        self.memtable_runs = n;
        self
    }

    pub fn merge_fraction(mut self, fraction: f64) -> Self {
        self.merge_fraction = fraction;
        self
    }

    pub fn bloom_false_positive_rate(mut self, rate: f64) -> Self {
        self.bloom_false_positive_rate = rate;
        self
    }

    pub fn page_size(mut self, n: usize) -> Self {
        self.page_size = n;
        self
    }

    pub fn disk_runs_per_level(mut self, n: usize) -> Self {
        self.disk_runs_per_level = n;
        self
    }

    pub fn background_compaction(mut self, enabled: bool) -> Self {
        self.background_compaction = enabled;
        self
    }

    /// Check every parameter, naming the first bad one.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("elements_per_run", self.elements_per_run),
            ("memtable_runs", self.memtable_runs),
            ("page_size", self.page_size),
            ("disk_runs_per_level", self.disk_runs_per_level),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(Error::InvalidConfig(format!("{name} must be > 0")));
        }
        if !(self.merge_fraction > 0.0 && self.merge_fraction <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "merge_fraction must be in (0, 1], got {}",
                self.merge_fraction
            )));
        }
        if !(self.bloom_false_positive_rate > 0.0 && self.bloom_false_positive_rate < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "bloom_false_positive_rate must be in (0, 1), got {}",
                self.bloom_false_positive_rate
            )));
        }
        Ok(())
    }

    /// Memtable runs flushed per cycle.
    pub fn memtable_merge_size(&self) -> usize {
        scaled(self.merge_fraction, self.memtable_runs)
    }

    /// Oldest runs of a disk level merged downward per cascade.
    pub fn level_merge_size(&self) -> usize {
        scaled(self.merge_fraction, self.disk_runs_per_level)
    }

    /// Records per run on disk level 0: one flush worth of memtable runs.
    pub fn level0_run_size(&self) -> usize {
        self.memtable_merge_size() * self.elements_per_run
    }
}

/// `ceil(fraction * n)`, kept within `1..=n`.
fn scaled(fraction: f64, n: usize) -> usize {
    ((fraction * n as f64).ceil() as usize).clamp(1, n.max(1))
}
