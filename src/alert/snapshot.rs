use std::path::PathBuf;

use tokio::{fs::OpenOptions, io::AsyncWriteExt};

// Collisions only happen when several events share one second
const MAX_SUFFIX: u32 = 1000;

/// Persists annotated snapshots as `capture_<timestamp>.png` files.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    directory: PathBuf,
}

impl SnapshotStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Writes `png` under a name derived from `label`. An existing file is never overwritten:
    /// the name gets a `_1`, `_2`, ... suffix instead.
    pub async fn save(&self, label: &str, png: &[u8]) -> Result<PathBuf, SnapshotError> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| SnapshotError::Io(self.directory.clone(), e))?;
        for n in 0..MAX_SUFFIX {
            let name = match n {
                0 => format!("capture_{}.png", label),
                n => format!("capture_{}_{}.png", label, n),
            };
            let path = self.directory.join(name);
            let mut file = match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(SnapshotError::Io(path, e)),
            };
            file.write_all(png)
                .await
                .map_err(|e| SnapshotError::Io(path.clone(), e))?;
            file.flush()
                .await
                .map_err(|e| SnapshotError::Io(path.clone(), e))?;
            return Ok(path);
        }
        Err(SnapshotError::NamesExhausted(label.to_string()))
    }
}

quick_error! {
    #[derive(Debug)]
    pub enum SnapshotError {
        Encode(error: image::ImageError) {
            display("Unable to encode snapshot: {}", error)
            from()
            source(error)
        }
        Io(path: PathBuf, error: std::io::Error) {
            display("Unable to write snapshot {}: {}", path.display(), error)
            source(error)
        }
        NamesExhausted(label: String) {
            display("Too many snapshots named after {}", label)
        }
    }
}
