use serde::Serialize;
use std::fmt::Debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A file waiting in the drop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteEntry {
    pub name: String,
    pub size: u64,
}

/// Where bank files are delivered. One session is opened per polling cycle.
pub trait RemoteDrop: Debug + Send + Sync {
    fn connect(&self) -> Result<Box<dyn DropSession>, TransportError>;

    /// Human readable location for logs and status pages.
    fn location(&self) -> String;
}

pub trait DropSession {
    fn list(&mut self) -> Result<Vec<RemoteEntry>, TransportError>;
    /// Copies `name` to `destination`, returning the number of bytes written.
    fn fetch(&mut self, name: &str, destination: &Path) -> Result<u64, TransportError>;
    fn remove(&mut self, name: &str) -> Result<(), TransportError>;
    fn deposit(&mut self, name: &str, bytes: &[u8]) -> Result<(), TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("drop {location} unreachable: {source}")]
    Unreachable {
        location: String,
        #[source]
        source: io::Error,
    },
    #[error("{operation} of '{name}' failed: {source}")]
    Operation {
        operation: &'static str,
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("refusing remote name '{0}'")]
    InvalidName(String),
}

impl TransportError {
    pub(crate) fn operation(operation: &'static str, name: &str, source: io::Error) -> Self {
        Self::Operation {
            operation,
            name: name.to_string(),
            source,
        }
    }
}

/// Drop names are single path components; anything else could escape the drop.
pub(crate) fn check_name(name: &str) -> Result<(), TransportError> {
    let plain = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && name != "..";
    if plain {
        Ok(())
    } else {
        Err(TransportError::InvalidName(name.to_string()))
    }
}

/// A drop backed by a mounted directory (NFS/SMB share, or a local folder in tests).
#[derive(Debug, Clone)]
pub struct DirectoryDrop {
    root: PathBuf,
}

impl DirectoryDrop {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl RemoteDrop for DirectoryDrop {
    fn connect(&self) -> Result<Box<dyn DropSession>, TransportError> {
        let metadata = fs::metadata(&self.root).map_err(|source| TransportError::Unreachable {
            location: self.location(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(TransportError::Unreachable {
                location: self.location(),
                source: io::Error::new(io::ErrorKind::NotFound, "not a directory"),
            });
        }
        Ok(Box::new(DirectorySession {
            root: self.root.clone(),
        }))
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }
}

#[derive(Debug)]
struct DirectorySession {
    root: PathBuf,
}

impl DirectorySession {
    fn path_for(&self, name: &str) -> Result<PathBuf, TransportError> {
        check_name(name)?;
        Ok(self.root.join(name))
    }
}

impl DropSession for DirectorySession {
    fn list(&mut self) -> Result<Vec<RemoteEntry>, TransportError> {
        let entries =
            fs::read_dir(&self.root).map_err(|err| TransportError::operation("list", ".", err))?;

        let mut listed = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| TransportError::operation("list", ".", err))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            // Hidden names are in-flight deposits.
            if name.starts_with('.') {
                continue;
            }
            let metadata = entry
                .metadata()
                .map_err(|err| TransportError::operation("stat", &name, err))?;
            if metadata.is_file() {
                listed.push(RemoteEntry {
                    name,
                    size: metadata.len(),
                });
            }
        }
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listed)
    }

    fn fetch(&mut self, name: &str, destination: &Path) -> Result<u64, TransportError> {
        let source = self.path_for(name)?;
        fs::copy(&source, destination).map_err(|err| TransportError::operation("fetch", name, err))
    }

    fn remove(&mut self, name: &str) -> Result<(), TransportError> {
        let path = self.path_for(name)?;
        fs::remove_file(path).map_err(|err| TransportError::operation("remove", name, err))
    }

    fn deposit(&mut self, name: &str, bytes: &[u8]) -> Result<(), TransportError> {
        let target = self.path_for(name)?;
        let partial = self.root.join(format!(".{name}.partial"));
        fs::write(&partial, bytes)
            .and_then(|()| fs::rename(&partial, &target))
            .map_err(|err| {
                let _ = fs::remove_file(&partial);
                TransportError::operation("deposit", name, err)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_is_unreachable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let drop = DirectoryDrop::new(dir.path().join("absent"));
        assert!(matches!(
            drop.connect(),
            Err(TransportError::Unreachable { .. })
        ));
    }

    #[test]
    fn deposit_list_fetch_remove() {
        let dir = tempfile::tempdir().expect("tempdir");
        let staging = tempfile::tempdir().expect("tempdir");
        let drop = DirectoryDrop::new(dir.path());
        let mut session = drop.connect().expect("connects");

        session.deposit("b.csv", b"date,amount\n").expect("deposits");
        session.deposit("a.mt940", b":20:X\n").expect("deposits");
        fs::create_dir(dir.path().join("nested")).expect("mkdir");
        fs::write(dir.path().join(".hidden.partial"), b"x").expect("writes");

        let names: Vec<String> = session
            .list()
            .expect("lists")
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(names, ["a.mt940", "b.csv"]);

        let local = staging.path().join("b.csv");
        assert_eq!(session.fetch("b.csv", &local).expect("fetches"), 12);
        assert_eq!(fs::read(&local).expect("reads"), b"date,amount\n");

        session.remove("b.csv").expect("removes");
        assert!(!dir.path().join("b.csv").exists());
        assert!(session.remove("b.csv").is_err());
    }

    #[test]
    fn refuses_path_traversal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut session = DirectoryDrop::new(dir.path()).connect().expect("connects");
        assert!(matches!(
            session.deposit("../escape.csv", b"x"),
            Err(TransportError::InvalidName(_))
        ));
    }
}
