//! # skiplsm
//!
//! A key-value storage engine using the Log-Structured Merge-Tree design.
//!
//! ## Core idea
//! Writes land in a small set of in-memory skip lists. When they fill up,
//! the oldest ones are merged into one sorted file on disk level 0. Each
//! disk level holds a fixed number of runs; a full level merges its oldest
//! runs into one larger run on the level below. Deleted keys are written as
//! tombstones and are only dropped once they reach the deepest level.
//!
//! ```text
//!  memtable   [run][run][run][run]          newest
//!                   │ flush
//!  level 0    [run][run][run]
//!                   │ cascade
//!  level 1    [  run  ][  run  ]
//!                   │
//!  level 2    [      run      ]             oldest
//! ```
//!
//! Nothing is durable: there is no write-ahead log and run files are not
//! recovered on open.

pub mod bloom;
pub mod compaction;
pub mod db;
pub mod dedup;
pub mod disk;
pub mod error;
pub mod iterator;
pub mod memtable;
pub mod options;
pub mod types;

// Public re-exports for the top-level API
pub use db::{DB, LevelStats, Stats};
pub use error::{Error, Result};
pub use options::Options;
pub use types::{FixedWidth, KVPair};
