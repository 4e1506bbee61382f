use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::bloom::{BloomFilter, BloomFilterBuilder};
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;
use crate::types::{FixedWidth, KVPair};

/// Deterministic file name of the run in `slot` of disk level `level`.
pub fn run_file_name(level: usize, slot: usize) -> String {
    format!("run_{level}_{slot}.dat")
}

/// An immutable sorted run of key-value records, stored in its own file.
///
/// File layout is a dense array of fixed-width records in ascending key
/// order. No header, no checksum:
///
/// ```text
/// [key0 | value0][key1 | value1] ... [key(len-1) | value(len-1)]
/// ```
///
/// In memory the run keeps only a sparse index: the key at every
/// `page_size`-th record (the fence pointers), a bloom filter, and the
/// min/max key. A point lookup narrows to one page through the fences, reads
/// that page and binary searches it.
///
/// Construction preallocates `capacity` records. `write` grows the file by
/// doubling when data lands past the end. `build_index` must run after the
/// final write and before any read.
pub struct DiskRun<K, V> {
    path: PathBuf,
    file: File,
    level: usize,
    slot: usize,
    /// Records the file has room for.
    capacity: usize,
    /// Records actually written.
    len: usize,
    page_size: usize,
    fences: Vec<K>,
    filter: BloomFilter,
    bounds: Option<(K, K)>,
    false_positive_rate: f64,
    _values: PhantomData<V>,
}

impl<K: FixedWidth, V: FixedWidth> DiskRun<K, V> {
    /// Create (or truncate) the backing file and size it for `capacity` records.
    pub fn create(
        dir: &Path,
        level: usize,
        slot: usize,
        capacity: usize,
        page_size: usize,
        false_positive_rate: f64,
    ) -> Result<Self> {
        let path = dir.join(run_file_name(level, slot));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len((capacity * KVPair::<K, V>::WIDTH) as u64)?;
        trace!(path = %path.display(), capacity, "created disk run");

        Ok(DiskRun {
            path,
            file,
            level,
            slot,
            capacity,
            len: 0,
            page_size: page_size.max(1),
            fences: Vec::new(),
            filter: BloomFilter::new(1, false_positive_rate),
            bounds: None,
            false_positive_rate,
            _values: PhantomData,
        })
    }

    /// Copy `pairs` into the run starting at record `offset`.
    ///
    /// Pairs must be sorted and continue the order of what precedes them.
    pub fn write(&mut self, pairs: &[KVPair<K, V>], offset: usize) -> Result<()> {
        let end = offset + pairs.len();
        if end > self.capacity {
            self.grow(end)?;
        }

        let buf = KVPair::encode_all(pairs);
        let mut file = &self.file;
        file.seek(SeekFrom::Start((offset * KVPair::<K, V>::WIDTH) as u64))?;
        file.write_all(&buf)?;

        self.len = self.len.max(end);
        Ok(())
    }

    /// Double capacity until `required` records fit.
    fn grow(&mut self, required: usize) -> Result<()> {
        let mut capacity = self.capacity.max(1);
        while capacity < required {
            capacity *= 2;
        }
        self.file.set_len((capacity * KVPair::<K, V>::WIDTH) as u64)?;
        trace!(path = %self.path.display(), from = self.capacity, to = capacity, "grew disk run");
        self.capacity = capacity;
        Ok(())
    }

    /// Set the capacity (and the file size) to exactly `len` records.
    pub fn truncate(&mut self, len: usize) -> Result<()> {
        if len < self.len {
            self.len = len;
        }
        self.capacity = len;
        self.file.set_len((len * KVPair::<K, V>::WIDTH) as u64)?;
        Ok(())
    }

    /// Build the fence pointers, bloom filter and min/max from the data on disk.
    pub fn build_index(&mut self) -> Result<()> {
        let mut fences = Vec::with_capacity(self.len.div_ceil(self.page_size));
        let mut filter = BloomFilterBuilder::new(self.len, self.false_positive_rate);
        let mut bounds: Option<(K, K)> = None;

        let mut cursor = self.iter()?;
        let mut index = 0usize;
        while cursor.is_valid() {
            let key = cursor.key();
            if index % self.page_size == 0 {
                fences.push(key);
            }
            filter.add_key(key);
            bounds = Some(match bounds {
                None => (key, key),
                Some((min, _)) => (min, key),
            });
            index += 1;
            cursor.next()?;
        }

        self.fences = fences;
        self.filter = filter.build();
        self.bounds = bounds;
        Ok(())
    }

    /// Bounds and bloom check: false means `key` is certainly not here.
    pub fn may_contain(&self, key: K) -> bool {
        match self.bounds {
            Some((min, max)) if key >= min && key <= max => {
                key.with_bytes(|bytes| self.filter.may_contain(bytes))
            }
            _ => false,
        }
    }

    /// Find `key`. Returns the stored value, tombstone included.
    pub fn lookup(&self, key: K) -> Result<Option<V>> {
        if self.len == 0 {
            return Ok(None);
        }
        let (start, end) = self.page_span(key);
        let page = self.read_range(start, end)?;
        Ok(page
            .binary_search_by(|pair| pair.key.cmp(&key))
            .ok()
            .map(|i| page[i].value))
    }

    /// Index bounds `(start, end)` of the records with `lo <= key < hi`.
    pub fn range(&self, lo: K, hi: K) -> Result<(usize, usize)> {
        if self.len == 0 || hi <= lo {
            return Ok((0, 0));
        }
        let start = self.lower_bound(lo)?;
        let end = self.lower_bound(hi)?;
        Ok((start, end.max(start)))
    }

    /// Read records `[start, end)` from the file.
    pub fn read_range(&self, start: usize, end: usize) -> Result<Vec<KVPair<K, V>>> {
        let end = end.min(self.len);
        if start >= end {
            return Ok(Vec::new());
        }
        let width = KVPair::<K, V>::WIDTH;
        let mut buf = vec![0u8; (end - start) * width];
        let mut file = &self.file;
        file.seek(SeekFrom::Start((start * width) as u64))?;
        file.read_exact(&mut buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => Error::Corruption(format!(
                "{}: short read of records {start}..{end}",
                self.path.display()
            )),
            _ => Error::Io(e),
        })?;
        Ok(KVPair::decode_all(&buf))
    }

    /// Sequential cursor over every record, for merging and index building.
    pub fn iter(&self) -> Result<DiskRunIterator<K, V>> {
        DiskRunIterator::open(&self.path, self.len)
    }

    /// Index of the first record with key >= `key`.
    fn lower_bound(&self, key: K) -> Result<usize> {
        let (start, end) = self.page_span(key);
        let page = self.read_range(start, end)?;
        Ok(start + page.partition_point(|pair| pair.key < key))
    }

    /// Record span of the page that would contain `key`.
    ///
    /// Keys below the first fence map to the first page and keys past the
    /// last fence to the last page.
    fn page_span(&self, key: K) -> (usize, usize) {
        let page = self
            .fences
            .partition_point(|fence| *fence <= key)
            .saturating_sub(1);
        let start = page * self.page_size;
        (start, (start + self.page_size).min(self.len))
    }

    /// Move the backing file to the name of `slot`.
    pub fn rename_slot(&mut self, slot: usize) -> Result<()> {
        if slot == self.slot {
            return Ok(());
        }
        let path = self.path.with_file_name(run_file_name(self.level, slot));
        fs::rename(&self.path, &path)?;
        trace!(from = %self.path.display(), to = %path.display(), "renamed disk run");
        self.path = path;
        self.slot = slot;
        Ok(())
    }

    /// Close and delete the backing file.
    pub fn remove(self) -> Result<()> {
        let DiskRun { path, file, .. } = self;
        drop(file);
        fs::remove_file(&path)?;
        trace!(path = %path.display(), "removed disk run");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fences(&self) -> &[K] {
        &self.fences
    }

    /// Smallest and largest key, `None` while empty or unindexed.
    pub fn bounds(&self) -> Option<(K, K)> {
        self.bounds
    }
}

/// Streams the records of a disk run in order through a buffered reader.
///
/// Opens its own file handle, so its position is independent of the seeks
/// done by point reads on the same run.
pub struct DiskRunIterator<K, V> {
    reader: BufReader<File>,
    remaining: usize,
    current: Option<KVPair<K, V>>,
    buf: Vec<u8>,
}

impl<K: FixedWidth, V: FixedWidth> DiskRunIterator<K, V> {
    fn open(path: &Path, len: usize) -> Result<Self> {
        let mut iter = DiskRunIterator {
            reader: BufReader::new(File::open(path)?),
            remaining: len,
            current: None,
            buf: vec![0u8; KVPair::<K, V>::WIDTH],
        };
        iter.next()?;
        Ok(iter)
    }
}

impl<K: FixedWidth, V: FixedWidth> StorageIterator<K, V> for DiskRunIterator<K, V> {
    fn key(&self) -> K {
        self.current.map(|pair| pair.key).unwrap_or(K::MAX)
    }

    fn value(&self) -> V {
        self.current.map(|pair| pair.value).unwrap_or(V::MIN)
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<()> {
        if self.remaining == 0 {
            self.current = None;
            return Ok(());
        }
        self.reader.read_exact(&mut self.buf)?;
        self.current = Some(KVPair::decode(&self.buf));
        self.remaining -= 1;
        Ok(())
    }
}
