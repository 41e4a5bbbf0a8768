//! Atomic file persistence
//!
//! Writes land in a temporary file inside the destination directory and are
//! renamed over the target. Readers therefore observe either the previous or
//! the new contents, never a truncated file.

use crate::error::FileError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// A file that is only ever replaced atomically.
#[derive(Debug, Clone)]
pub struct AtomicFile {
    path: PathBuf,
}

impl AtomicFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole file, `None` if it does not exist.
    pub fn read(&self) -> Result<Option<Vec<u8>>, FileError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FileError::io(&self.path, e)),
        }
    }

    pub fn read_to_string(&self) -> Result<Option<String>, FileError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FileError::io(&self.path, e)),
        }
    }

    /// Write `contents` to a temporary sibling without touching the target.
    ///
    /// Nothing becomes visible until [`StagedWrite::commit`] is called;
    /// dropping the staged write discards it.
    pub fn stage(&self, contents: &[u8]) -> Result<StagedWrite, FileError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| FileError::io(&dir, e))?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        let mut temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", file_name))
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| FileError::io(&dir, e))?;
        temp.as_file_mut()
            .write_all(contents)
            .map_err(|e| FileError::io(temp.path(), e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| FileError::io(temp.path(), e))?;

        Ok(StagedWrite {
            temp,
            target: self.path.clone(),
        })
    }

    /// Atomically replace the file with `contents`.
    pub fn write(&self, contents: &[u8]) -> Result<(), FileError> {
        self.stage(contents)?.commit()
    }

    /// Atomically create the file, returning `false` if it already exists.
    pub fn create_new(&self, contents: &[u8]) -> Result<bool, FileError> {
        self.stage(contents)?.commit_new()
    }

    /// Remove the file, returning `false` if it was already gone.
    pub fn remove(&self) -> Result<bool, FileError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(FileError::io(&self.path, e)),
        }
    }
}

/// Contents written to a temporary file, waiting to be renamed into place.
#[derive(Debug)]
pub struct StagedWrite {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Rename the staged file over the target.
    pub fn commit(self) -> Result<(), FileError> {
        let target = self.target;
        self.temp
            .persist(&target)
            .map_err(|e| FileError::io(&target, e.error))?;
        debug!("Replaced {}", target.display());
        Ok(())
    }

    /// Move the staged file into place only if the target does not exist yet.
    pub fn commit_new(self) -> Result<bool, FileError> {
        let target = self.target;
        match self.temp.persist_noclobber(&target) {
            Ok(_) => {
                debug!("Created {}", target.display());
                Ok(true)
            }
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(FileError::io(&target, e.error)),
        }
    }
}

/// A JSON document persisted through [`AtomicFile`].
#[derive(Debug, Clone)]
pub struct JsonFile<T> {
    file: AtomicFile,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFile<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: AtomicFile::new(path),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn load(&self) -> Result<Option<T>, FileError> {
        let Some(bytes) = self.file.read()? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| FileError::Corrupt {
                path: self.file.path().to_path_buf(),
                source,
            })
    }

    pub fn stage(&self, value: &T) -> Result<StagedWrite, FileError> {
        self.file.stage(&Self::encode(value)?)
    }

    pub fn store(&self, value: &T) -> Result<(), FileError> {
        self.stage(value)?.commit()
    }

    pub fn create_new(&self, value: &T) -> Result<bool, FileError> {
        self.stage(value)?.commit_new()
    }

    pub fn remove(&self) -> Result<bool, FileError> {
        self.file.remove()
    }

    fn encode(value: &T) -> Result<Vec<u8>, FileError> {
        let mut bytes = serde_json::to_vec_pretty(value)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Doc {
        names: Vec<String>,
    }

    fn doc(names: &[&str]) -> Doc {
        Doc {
            names: names.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_read_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let file = AtomicFile::new(dir.path().join("missing.txt"));
        assert!(file.read().unwrap().is_none());
        assert!(file.read_to_string().unwrap().is_none());
    }

    #[test]
    fn test_write_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let file = AtomicFile::new(dir.path().join("a/b/c.txt"));
        file.write(b"hello").unwrap();
        assert_eq!(file.read_to_string().unwrap().as_deref(), Some("hello"));
    }

    #[test]
    fn test_write_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let file = AtomicFile::new(dir.path().join("c.txt"));
        file.write(b"first version, rather long").unwrap();
        file.write(b"second").unwrap();
        assert_eq!(file.read_to_string().unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn test_dropped_stage_leaves_previous_contents() {
        let dir = TempDir::new().unwrap();
        let file = AtomicFile::new(dir.path().join("c.txt"));
        file.write(b"before").unwrap();

        let staged = file.stage(b"after").unwrap();
        let temp_path = staged.temp_path().to_path_buf();
        assert!(temp_path.exists());
        drop(staged);

        assert!(!temp_path.exists());
        assert_eq!(file.read_to_string().unwrap().as_deref(), Some("before"));
    }

    #[test]
    fn test_staged_write_invisible_until_commit() {
        let dir = TempDir::new().unwrap();
        let file = AtomicFile::new(dir.path().join("c.txt"));
        file.write(b"before").unwrap();

        let staged = file.stage(b"after").unwrap();
        assert_eq!(file.read_to_string().unwrap().as_deref(), Some("before"));
        staged.commit().unwrap();
        assert_eq!(file.read_to_string().unwrap().as_deref(), Some("after"));
    }

    #[test]
    fn test_create_new_does_not_clobber() {
        let dir = TempDir::new().unwrap();
        let file = AtomicFile::new(dir.path().join("claim"));
        assert!(file.create_new(b"one").unwrap());
        assert!(!file.create_new(b"two").unwrap());
        assert_eq!(file.read_to_string().unwrap().as_deref(), Some("one"));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let file = AtomicFile::new(dir.path().join("gone"));
        file.write(b"x").unwrap();
        assert!(file.remove().unwrap());
        assert!(!file.remove().unwrap());
    }

    #[test]
    fn test_json_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let file: JsonFile<Doc> = JsonFile::new(dir.path().join("doc.json"));
        assert!(file.load().unwrap().is_none());

        file.store(&doc(&["a", "b"])).unwrap();
        assert_eq!(file.load().unwrap(), Some(doc(&["a", "b"])));
    }

    #[test]
    fn test_json_file_corrupt_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, "{\"names\": [\"a\"").unwrap();

        let file: JsonFile<Doc> = JsonFile::new(&path);
        match file.load() {
            Err(FileError::Corrupt { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected corrupt error, got {:?}", other),
        }
    }

    #[test]
    fn test_json_file_interrupted_write_keeps_prior_document() {
        let dir = TempDir::new().unwrap();
        let file: JsonFile<Doc> = JsonFile::new(dir.path().join("doc.json"));
        file.store(&doc(&["a"])).unwrap();

        // Simulated crash between temp write and rename
        let staged = file.stage(&doc(&["a", "b"])).unwrap();
        drop(staged);

        assert_eq!(file.load().unwrap(), Some(doc(&["a"])));
    }
}
