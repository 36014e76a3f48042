use std::path::{Path, PathBuf};

use tokio::{fs::OpenOptions, io::AsyncWriteExt};

use super::AlertRecord;

/// Append-only JSON Lines audit log of dispatched alerts.
#[derive(Debug, Clone)]
pub struct EventJournal {
    path: PathBuf,
}

impl EventJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one record as a single line with a single append so concurrent readers never see
    /// half a record.
    pub async fn append(&self, record: &AlertRecord) -> Result<(), JournalError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| JournalError::Io(self.path.clone(), e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| JournalError::Io(self.path.clone(), e))?;
        file.flush()
            .await
            .map_err(|e| JournalError::Io(self.path.clone(), e))?;
        Ok(())
    }
}

quick_error! {
    #[derive(Debug)]
    pub enum JournalError {
        Encode(error: serde_json::Error) {
            display("Unable to encode alert record: {}", error)
            from()
            source(error)
        }
        Io(path: PathBuf, error: std::io::Error) {
            display("Unable to append to {}: {}", path.display(), error)
            source(error)
        }
    }
}
