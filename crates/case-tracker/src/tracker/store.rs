use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::domain::CaseSnapshot;

/// Storage for the last snapshot seen per case, keyed by case id.
pub trait SnapshotStore: Send + Sync {
    /// `Ok(None)` when the case has never been persisted.
    fn load(&self, case_id: &str) -> Result<Option<CaseSnapshot>, StoreError>;
    /// Replaces whatever was stored for `snapshot.case_id`.
    fn save(&self, snapshot: &CaseSnapshot) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("case id {0:?} cannot be used as a storage key")]
    InvalidKey(String),
    #[error("snapshot io failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] bincode::Error),
    /// The blocking worker running the operation panicked or was cancelled.
    #[error("snapshot worker did not finish: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

const RECORD_VERSION: u16 = 1;

/// On-disk layout. The version tag lets older records be recognised and
/// discarded instead of misread.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRecord {
    version: u16,
    snapshot: CaseSnapshot,
}

/// One bincode file per case inside `dir`, named after the case id.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, case_id: &str) -> Result<PathBuf, StoreError> {
        let unsafe_key = case_id.is_empty()
            || case_id == "."
            || case_id == ".."
            || case_id.contains(['/', '\\', '\0']);
        if unsafe_key {
            return Err(StoreError::InvalidKey(case_id.to_string()));
        }
        Ok(self.dir.join(case_id))
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self, case_id: &str) -> Result<Option<CaseSnapshot>, StoreError> {
        let path = self.record_path(case_id)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(&path)(err)),
        };

        match bincode::deserialize::<SnapshotRecord>(&bytes) {
            Ok(record) if record.version == RECORD_VERSION => Ok(Some(record.snapshot)),
            Ok(record) => {
                warn!(case_id, version = record.version, "ignoring snapshot with unknown version");
                Ok(None)
            }
            Err(err) => {
                warn!(case_id, error = %err, "ignoring unreadable snapshot");
                Ok(None)
            }
        }
    }

    fn save(&self, snapshot: &CaseSnapshot) -> Result<(), StoreError> {
        let path = self.record_path(&snapshot.case_id)?;
        let record = SnapshotRecord {
            version: RECORD_VERSION,
            snapshot: snapshot.clone(),
        };
        let bytes = bincode::serialize(&record)?;

        fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;
        let staging = self.dir.join(format!(".{}.tmp", snapshot.case_id));
        {
            let mut file = fs::File::create(&staging).map_err(io_error(&staging))?;
            file.write_all(&bytes).map_err(io_error(&staging))?;
            file.sync_all().map_err(io_error(&staging))?;
        }
        fs::rename(&staging, &path).map_err(io_error(&path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(case_id: &str, status: &str) -> CaseSnapshot {
        CaseSnapshot {
            case_id: case_id.to_string(),
            name: "JOHN DOE".to_string(),
            status: status.to_string(),
            details: "* Jan 5, 2024- We received your application.".to_string(),
            recipients: vec!["a@example.com".to_string(), "b@example.com".to_string()],
        }
    }

    #[test]
    fn load_of_unknown_case_is_none() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileSnapshotStore::new(dir.path());
        assert!(store.load("987").expect("load succeeds").is_none());
    }

    #[test]
    fn saved_snapshot_loads_back_unchanged() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileSnapshotStore::new(dir.path().join("nested"));
        let original = snapshot("987", "In Progress");

        store.save(&original).expect("save succeeds");
        let loaded = store.load("987").expect("load succeeds");

        assert_eq!(loaded, Some(original));
        assert!(dir.path().join("nested").join("987").is_file());
    }

    #[test]
    fn save_overwrites_previous_record() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileSnapshotStore::new(dir.path());

        store.save(&snapshot("987", "In Progress")).expect("first save");
        store.save(&snapshot("987", "Decision Made")).expect("second save");

        let loaded = store.load("987").expect("load").expect("record present");
        assert_eq!(loaded.status, "Decision Made");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("987")]);
    }

    #[test]
    fn corrupt_record_reads_as_first_observation() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("987"), b"\x01not a snapshot").expect("write garbage");
        let store = FileSnapshotStore::new(dir.path());
        assert!(store.load("987").expect("load succeeds").is_none());
    }

    #[test]
    fn path_like_case_ids_are_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileSnapshotStore::new(dir.path());
        for key in ["", "..", "../escape", "a/b", "a\\b"] {
            assert!(
                matches!(store.load(key), Err(StoreError::InvalidKey(_))),
                "{key:?} should be rejected"
            );
        }
        let mut bad = snapshot("ok", "x");
        bad.case_id = "../../etc".to_string();
        assert!(matches!(store.save(&bad), Err(StoreError::InvalidKey(_))));
    }
}
