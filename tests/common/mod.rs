//! Shared setup for ledger integration tests

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use pharmacy_pos::numeric::TIMESTAMP_FORMAT;
use pharmacy_pos::{Clock, Config, DataManager, FileStore};
use tempfile::TempDir;

/// Workbook file in a temporary directory
pub struct TestContext {
    /// Kept to prevent temp directory cleanup until TestContext is dropped
    _temp_dir: TempDir,
    pub workbook_path: PathBuf,
}

impl TestContext {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let workbook_path = temp_dir.path().join("pharmacy.bin.gz");
        Self {
            _temp_dir: temp_dir,
            workbook_path,
        }
    }

    /// Open the workbook with the clock pinned to `at`
    pub fn open_at(&self, at: &str) -> DataManager<FileStore> {
        let config = Config {
            workbook_path: self.workbook_path.clone(),
            ..Config::default()
        };
        let store = FileStore::open(&self.workbook_path).expect("Failed to open workbook");
        let mut dm = DataManager::with_config(store, &config);
        dm.set_clock(Clock::Fixed(at_time(at)));
        dm
    }
}

pub fn at_time(raw: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).expect("Bad test timestamp")
}

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}
