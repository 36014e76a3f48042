//! Helpers shared by the unit tests.

use std::path::{Path, PathBuf};

use crate::alert::AlertRecord;

/// Fresh directory under the system temp dir
pub fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("eyeris-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn read_records(path: &Path) -> Vec<AlertRecord> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}
