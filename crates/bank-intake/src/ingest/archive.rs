use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("cannot prepare archive directory {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Final resting place for every fetched file, processed or not.
#[derive(Debug, Clone)]
pub struct Archive {
    root: PathBuf,
}

impl Archive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Moves `staged` into the archive under a timestamped name derived from
    /// `original_name`, never overwriting an existing archive file.
    pub fn store(&self, staged: &Path, original_name: &str) -> Result<PathBuf, ArchiveError> {
        self.store_at(staged, original_name, Utc::now())
    }

    pub(crate) fn store_at(
        &self,
        staged: &Path,
        original_name: &str,
        at: DateTime<Utc>,
    ) -> Result<PathBuf, ArchiveError> {
        fs::create_dir_all(&self.root).map_err(|source| ArchiveError::Prepare {
            path: self.root.clone(),
            source,
        })?;

        let target = self.free_target(original_name, at);
        move_file(staged, &target).map_err(|source| ArchiveError::Move {
            from: staged.to_path_buf(),
            to: target.clone(),
            source,
        })?;
        debug!(from = %staged.display(), to = %target.display(), "archived staged file");
        Ok(target)
    }

    fn free_target(&self, original_name: &str, at: DateTime<Utc>) -> PathBuf {
        let (stem, extension) = split_extension(original_name);
        let stamp = at.format("%Y%m%d_%H%M%S_%6f");
        let base = format!("{stem}_Processed_{stamp}");

        let mut candidate = self.root.join(format!("{base}{extension}"));
        let mut counter = 1;
        while candidate.exists() {
            candidate = self.root.join(format!("{base}_{counter}{extension}"));
            counter += 1;
        }
        candidate
    }
}

/// `statement.mt940` -> (`statement`, `.mt940`); names without a dot keep an empty extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(index) if index > 0 => name.split_at(index),
        _ => (name, ""),
    }
}

/// Rename, falling back to copy + delete across filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)?;
    if let Err(err) = fs::remove_file(from) {
        warn!(path = %from.display(), error = %err, "archived copy kept, staged file not removed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn names_carry_stamp_and_extension() {
        let staging = tempfile::tempdir().expect("tempdir");
        let archive_dir = tempfile::tempdir().expect("tempdir");
        let archive = Archive::new(archive_dir.path().join("archive"));
        let at = Utc.with_ymd_and_hms(2024, 1, 5, 9, 30, 15).unwrap();

        let staged = staging.path().join("statement.mt940");
        fs::write(&staged, b"data").expect("writes");
        let first = archive
            .store_at(&staged, "statement.mt940", at)
            .expect("archives");
        assert_eq!(
            first.file_name().and_then(|n| n.to_str()),
            Some("statement_Processed_20240105_093015_000000.mt940")
        );
        assert!(!staged.exists());

        fs::write(&staged, b"again").expect("writes");
        let second = archive
            .store_at(&staged, "statement.mt940", at)
            .expect("archives");
        assert_eq!(
            second.file_name().and_then(|n| n.to_str()),
            Some("statement_Processed_20240105_093015_000000_1.mt940")
        );
        assert_eq!(fs::read(&first).expect("reads"), b"data");
    }

    #[test]
    fn missing_staged_file_is_move_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = Archive::new(dir.path());
        let err = archive
            .store(&dir.path().join("absent.csv"), "absent.csv")
            .expect_err("fails");
        assert!(matches!(err, ArchiveError::Move { .. }));
    }

    #[test]
    fn split_extension_handles_dotless_names() {
        assert_eq!(split_extension("report"), ("report", ""));
        assert_eq!(split_extension(".hidden"), (".hidden", ""));
        assert_eq!(split_extension("a.b.csv"), ("a.b", ".csv"));
    }
}
