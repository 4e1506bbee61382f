pub mod level;
pub mod run;

pub use level::DiskLevel;
pub use run::{DiskRun, DiskRunIterator, run_file_name};
