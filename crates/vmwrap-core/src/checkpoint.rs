//! Persistent resume point of the job.

use std::{
    io,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};
use vmwrap_model::CheckpointRecord;

use crate::fsutil::atomic_write;

/// File-backed [`CheckpointRecord`] store.
///
/// The file holds one line, `"<completed> <cumulative_cpu>\n"`. Writes are
/// atomic, so a crash leaves either the previous record or the new one.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current record; a missing or unreadable file yields the zero record.
    pub fn read(&self) -> CheckpointRecord {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(target: "vmwrap.core.checkpoint", path = %self.path.display(), "no checkpoint; starting fresh");
                return CheckpointRecord::zero();
            }
            Err(e) => {
                warn!(target: "vmwrap.core.checkpoint", path = %self.path.display(), error = %e, "checkpoint unreadable; starting fresh");
                return CheckpointRecord::zero();
            }
        };
        match raw.parse::<CheckpointRecord>() {
            Ok(record) => {
                debug!(target: "vmwrap.core.checkpoint", %record, "checkpoint loaded");
                record
            }
            Err(e) => {
                warn!(target: "vmwrap.core.checkpoint", path = %self.path.display(), error = %e, "checkpoint corrupt; starting fresh");
                CheckpointRecord::zero()
            }
        }
    }

    pub fn write(&self, record: &CheckpointRecord) -> io::Result<()> {
        atomic_write(&self.path, format!("{record}\n").as_bytes())?;
        debug!(target: "vmwrap.core.checkpoint", %record, "checkpoint written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn store(dir: &TempDir) -> CheckpointStore {
        CheckpointStore::new(dir.path().join("checkpoint"))
    }

    #[test]
    fn missing_file_reads_as_zero() {
        let dir = TempDir::new().unwrap();
        assert_eq!(store(&dir).read(), CheckpointRecord::zero());
    }

    #[test]
    fn corrupt_file_reads_as_zero() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        for junk in ["", "garbage", "3", "3 x", "-1 2.0", "2 1.0 extra"] {
            std::fs::write(s.path(), junk).unwrap();
            assert_eq!(s.read(), CheckpointRecord::zero(), "{junk:?}");
        }
    }

    #[test]
    fn written_record_reads_back_as_one_line() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.write(&CheckpointRecord::new(2, 41.5)).unwrap();

        let raw = std::fs::read_to_string(s.path()).unwrap();
        assert_eq!(raw.lines().count(), 1);
        assert!(raw.starts_with("2 "));
        assert_eq!(s.read(), CheckpointRecord::new(2, 41.5));
    }

    #[test]
    fn rewrite_replaces_previous_record() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.write(&CheckpointRecord::new(1, 3.0)).unwrap();
        s.write(&CheckpointRecord::new(2, 7.25)).unwrap();

        assert_eq!(s.read(), CheckpointRecord::new(2, 7.25));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn interrupted_write_leaves_previous_record_readable() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.write(&CheckpointRecord::new(2, 7.25)).unwrap();
        // A kill between the temp write and the rename leaves this behind.
        let orphan = dir
            .path()
            .join(format!(".checkpoint.{}.tmp", uuid::Uuid::new_v4().simple()));
        std::fs::write(&orphan, "3 9").unwrap();

        let record = s.read();
        assert_eq!(record, CheckpointRecord::new(2, 7.25));
        assert!(record.fits(3));

        // The next write still lands on the real file.
        s.write(&CheckpointRecord::new(3, 9.5)).unwrap();
        assert_eq!(s.read(), CheckpointRecord::new(3, 9.5));
        assert_eq!(std::fs::read_to_string(&orphan).unwrap(), "3 9");
    }

    #[test]
    fn write_into_missing_directory_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let s = CheckpointStore::new(dir.path().join("nope").join("checkpoint"));
        assert!(s.write(&CheckpointRecord::new(1, 1.0)).is_err());
        assert_eq!(s.read(), CheckpointRecord::zero());
    }
}
