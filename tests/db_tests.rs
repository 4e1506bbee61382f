use std::collections::BTreeMap;
use std::path::Path;

use skiplsm::{DB, Error, Options};

fn small(dir: &Path, background: bool) -> Options {
    Options::new(dir)
        .elements_per_run(50)
        .memtable_runs(3)
        .merge_fraction(1.0)
        .page_size(16)
        .disk_runs_per_level(3)
        .background_compaction(background)
}

// =============================================================================
// Test 1: Basic insert, overwrite, delete in the memtable
// =============================================================================
#[test]
fn memtable_only_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let mut db: DB<i64, i64> = DB::open(small(dir.path(), false)).unwrap();

    db.insert(1, 10).unwrap();
    db.insert(2, 20).unwrap();
    db.insert(1, 11).unwrap();
    db.delete(2).unwrap();

    assert_eq!(db.lookup(1).unwrap(), Some(11));
    assert_eq!(db.lookup(2).unwrap(), None);
    assert_eq!(db.lookup(3).unwrap(), None);
    assert_eq!(db.range(0, 10).unwrap(), vec![(1, 11)]);
    assert_eq!(db.buffer_len(), 2);
}

// =============================================================================
// Test 2: Reserved keys and values are rejected
// =============================================================================
#[test]
fn reserved_domain_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut db: DB<i64, i64> = DB::open(small(dir.path(), false)).unwrap();

    assert!(matches!(db.insert(i64::MIN, 1), Err(Error::ReservedKey)));
    assert!(matches!(db.insert(i64::MAX, 1), Err(Error::ReservedKey)));
    assert!(matches!(db.insert(1, i64::MIN), Err(Error::ReservedValue)));
    assert!(matches!(db.delete(i64::MAX), Err(Error::ReservedKey)));
    assert_eq!(db.buffer_len(), 0);
}

#[test]
fn invalid_options_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let opts = small(dir.path(), false).memtable_runs(0);
    assert!(matches!(DB::<i64, i64>::open(opts), Err(Error::InvalidConfig(_))));

    let opts = small(dir.path(), false).merge_fraction(0.0);
    assert!(matches!(DB::<i64, i64>::open(opts), Err(Error::InvalidConfig(_))));
}

// =============================================================================
// Test 3: Range after deletes spanning memtable and disk
// =============================================================================
fn delete_prefix_then_range(background: bool) {
    let dir = tempfile::tempdir().unwrap();
    let mut db: DB<i64, i64> = DB::open(small(dir.path(), background)).unwrap();

    for k in 0..500 {
        db.insert(k, k * 2).unwrap();
    }
    for k in 0..200 {
        db.delete(k).unwrap();
    }

    let got = db.range(0, 500).unwrap();
    assert_eq!(got.len(), 300);
    assert_eq!(got.first(), Some(&(200, 400)));
    assert_eq!(got.last(), Some(&(499, 998)));
    assert!(got.windows(2).all(|w| w[0].0 < w[1].0));

    assert_eq!(db.lookup(150).unwrap(), None);
    assert_eq!(db.lookup(250).unwrap(), Some(500));
    assert_eq!(db.live_count().unwrap(), 300);
}

#[test]
fn delete_prefix_then_range_sync() {
    delete_prefix_then_range(false);
}

#[test]
fn delete_prefix_then_range_background() {
    delete_prefix_then_range(true);
}

// =============================================================================
// Test 3b: Every key read back before and after deleting a prefix
// =============================================================================
#[test]
fn every_key_visible_then_prefix_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let mut db: DB<i64, i64> = DB::open(small(dir.path(), true)).unwrap();

    for k in 0..500 {
        db.insert(k, k).unwrap();
    }
    for k in 0..500 {
        assert_eq!(db.lookup(k).unwrap(), Some(k), "key {k}");
    }

    for k in 0..200 {
        db.delete(k).unwrap();
    }
    for k in 0..200 {
        assert_eq!(db.lookup(k).unwrap(), None, "deleted key {k}");
    }
    for k in 200..500 {
        assert_eq!(db.lookup(k).unwrap(), Some(k), "key {k}");
    }

    let got = db.range(0, 500).unwrap();
    assert_eq!(got.len(), 300);
    assert_eq!(got, (200..500).map(|k| (k, k)).collect::<Vec<_>>());
}

#[test]
fn empty_or_inverted_range() {
    let dir = tempfile::tempdir().unwrap();
    let mut db: DB<i64, i64> = DB::open(small(dir.path(), false)).unwrap();
    db.insert(5, 5).unwrap();

    assert!(db.range(5, 5).unwrap().is_empty());
    assert!(db.range(9, 1).unwrap().is_empty());
    assert_eq!(db.range(5, 6).unwrap(), vec![(5, 5)]);
}

// =============================================================================
// Test 4: Newer memtable run wins when both are flushed together
// =============================================================================
#[test]
fn flush_keeps_newest_value() {
    let dir = tempfile::tempdir().unwrap();
    let opts = Options::new(dir.path())
        .elements_per_run(2)
        .memtable_runs(2)
        .disk_runs_per_level(2)
        .background_compaction(false);
    let mut db: DB<i64, i64> = DB::open(opts).unwrap();

    db.insert(1, 100).unwrap(); // older run
    db.insert(2, 200).unwrap();
    db.insert(1, 111).unwrap(); // newer run
    db.insert(3, 300).unwrap();
    db.insert(4, 400).unwrap(); // triggers the flush

    let stats = db.stats().unwrap();
    assert_eq!(stats.buffer_entries, 1);
    assert_eq!(stats.levels[0].runs, 1);
    assert_eq!(stats.disk_entries(), 3);

    assert_eq!(db.lookup(1).unwrap(), Some(111));
    assert_eq!(db.range(0, 10).unwrap(), vec![(1, 111), (2, 200), (3, 300), (4, 400)]);
    assert!(dir.path().join("run_0_0.dat").exists());
}

// =============================================================================
// Test 5: Tombstones are reclaimed at the deepest level
// =============================================================================
#[test]
fn tombstones_reclaimed_at_last_level() {
    let dir = tempfile::tempdir().unwrap();
    let opts = Options::new(dir.path())
        .elements_per_run(4)
        .memtable_runs(2)
        .merge_fraction(1.0)
        .disk_runs_per_level(2)
        .background_compaction(false);
    let mut db: DB<i64, i64> = DB::open(opts).unwrap();

    for k in 1..=8 {
        db.insert(k, k).unwrap();
    }
    for k in 1..=8 {
        db.delete(k).unwrap();
    }
    db.insert(100, 100).unwrap();

    // Values and tombstones both sit in level 0
    let stats = db.stats().unwrap();
    assert_eq!(stats.levels.len(), 1);
    assert_eq!(stats.levels[0].entries, 16);
    for k in 1..=8 {
        assert_eq!(db.lookup(k).unwrap(), None);
    }

    for k in 101..=108 {
        db.insert(k, k).unwrap();
    }

    // Level 0 cascaded into a new, empty level 1: nothing survives
    let stats = db.stats().unwrap();
    assert_eq!(stats.levels.len(), 2);
    assert_eq!(stats.levels[1].entries, 0);
    assert_eq!(stats.levels[1].run_size, 16);
    assert_eq!(stats.levels[0].entries, 8);
    assert_eq!(stats.disk_entries(), 8);
    assert_eq!(stats.buffer_entries, 1);

    for k in 1..=8 {
        assert_eq!(db.lookup(k).unwrap(), None);
    }
    assert_eq!(db.range(0, 1000).unwrap().len(), 9);
}

// =============================================================================
// Test 6: Forced flushes and cascades keep every last write visible
// =============================================================================
fn forced_flush_roundtrip(background: bool) {
    let dir = tempfile::tempdir().unwrap();
    let opts = Options::new(dir.path())
        .elements_per_run(10)
        .memtable_runs(4)
        .merge_fraction(0.5)
        .page_size(8)
        .disk_runs_per_level(3)
        .background_compaction(background);
    let mut db: DB<i64, i64> = DB::open(opts).unwrap();
    let mut model = BTreeMap::new();

    for round in 0..3i64 {
        for k in 0..1500i64 {
            let key = (k * 37) % 1500 + 1;
            let value = key * 10 + round + 1;
            db.insert(key, value).unwrap();
            model.insert(key, value);
        }
    }
    for key in (1..=1500).step_by(7) {
        db.delete(key).unwrap();
        model.remove(&key);
    }

    let stats = db.stats().unwrap();
    assert!(stats.levels.len() > 2, "expected several disk levels, got {stats:?}");

    for key in 1..=1500 {
        assert_eq!(db.lookup(key).unwrap(), model.get(&key).copied(), "key {key}");
    }
    let expected: Vec<_> = model.iter().map(|(k, v)| (*k, *v)).collect();
    assert_eq!(db.range(i64::MIN + 1, i64::MAX).unwrap(), expected);
    assert_eq!(
        db.range(300, 900).unwrap(),
        model.range(300..900).map(|(k, v)| (*k, *v)).collect::<Vec<_>>()
    );
}

#[test]
fn forced_flush_roundtrip_sync() {
    forced_flush_roundtrip(false);
}

#[test]
fn forced_flush_roundtrip_background() {
    forced_flush_roundtrip(true);
}

// =============================================================================
// Test 7: Partial flushes keep the newest runs in memory
// =============================================================================
#[test]
fn partial_flush_keeps_newest_runs() {
    let dir = tempfile::tempdir().unwrap();
    let opts = Options::new(dir.path())
        .elements_per_run(5)
        .memtable_runs(4)
        .merge_fraction(0.5)
        .background_compaction(false);
    let mut db: DB<u32, u32> = DB::open(opts).unwrap();

    db.bulk_load((1..=21).map(|k| (k, k))).unwrap();

    // 20 entries filled the buffer; the 21st flushed the two oldest runs
    let stats = db.stats().unwrap();
    assert_eq!(stats.buffer_entries, 11);
    assert_eq!(stats.disk_entries(), 10);
    assert_eq!(stats.total_entries(), 21);
    assert_eq!(stats.levels[0].run_size, 10);
    assert_eq!(db.live_count().unwrap(), 21);
}

#[test]
fn drop_joins_background_flush() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut db: DB<i32, i32> = DB::open(small(dir.path(), true)).unwrap();
        db.bulk_load((1..=151).map(|k| (k, -k))).unwrap();
    }

    // The flush finished before drop returned: the first record is on disk
    let bytes = std::fs::read(dir.path().join("run_0_0.dat")).unwrap();
    assert_eq!(bytes.len(), 150 * 8);
    assert_eq!(&bytes[..4], &1i32.to_le_bytes());
    assert_eq!(&bytes[4..8], &(-1i32).to_le_bytes());
}

// =============================================================================
// Test 8: A failed background flush disables the engine without losing
// the writes still buffered
// =============================================================================
#[test]
fn failed_flush_is_sticky_and_keeps_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    let opts = Options::new(&data)
        .elements_per_run(2)
        .memtable_runs(1)
        .disk_runs_per_level(1)
        .background_compaction(true);
    let mut db: DB<i64, i64> = DB::open(opts).unwrap();

    for k in 1..=4 {
        db.insert(k, k).unwrap();
    }
    db.stats().unwrap();

    // The next flush cascades and needs a new level file
    std::fs::remove_dir_all(&data).unwrap();
    db.insert(5, 5).unwrap();
    db.insert(6, 6).unwrap();

    // Flushing {5, 6} first waits on the failed merge of {3, 4}
    assert!(matches!(db.insert(7, 7), Err(Error::Io(_))));
    assert_eq!(db.buffer_len(), 2);

    assert!(matches!(db.insert(8, 8), Err(Error::EngineFailed(_))));
    assert!(matches!(db.lookup(5), Err(Error::EngineFailed(_))));
    assert!(matches!(db.range(0, 10), Err(Error::EngineFailed(_))));
    assert!(matches!(db.stats(), Err(Error::EngineFailed(_))));
    assert!(matches!(db.await_compaction(), Err(Error::EngineFailed(_))));
    assert_eq!(db.buffer_len(), 2);
}

#[test]
fn failed_sync_flush_is_sticky() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    let opts = Options::new(&data)
        .elements_per_run(2)
        .memtable_runs(1)
        .disk_runs_per_level(1)
        .background_compaction(false);
    let mut db: DB<i64, i64> = DB::open(opts).unwrap();

    for k in 1..=4 {
        db.insert(k, k).unwrap();
    }
    std::fs::remove_dir_all(&data).unwrap();

    assert!(matches!(db.insert(5, 5), Err(Error::Io(_))));
    assert!(matches!(db.insert(6, 6), Err(Error::EngineFailed(_))));
    assert!(matches!(db.lookup(1), Err(Error::EngineFailed(_))));
}
