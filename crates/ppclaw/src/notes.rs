//! Per-group notes storage.
//!
//! Notes are plain text documents, one per group, stored as files under a
//! directory namespaced by agent instance. Group ids are validated before
//! any path is built, so a malformed id never reaches the filesystem.

use crate::error::{NotesError, ValidationError};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Maximum size of a notes document in bytes (100 KiB).
pub const MAX_NOTES_BYTES: usize = 100 * 1024;

/// A group identifier in strict hyphenated UUID form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupId(String);

impl GroupId {
    /// Validate `raw` as a group id.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidGroupId`] unless `raw` is a 36
    /// character hyphenated UUID.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        // braced, urn and simple forms parse too but have other lengths
        if raw.len() == 36 && Uuid::parse_str(raw).is_ok() {
            Ok(Self(raw.to_ascii_lowercase()))
        } else {
            Err(ValidationError::InvalidGroupId(raw.to_string()))
        }
    }

    /// Canonical (lowercase) form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Keyed text storage for group notes.
pub trait NotesStore: Send + Sync {
    /// Read the notes of `group`; empty when none were written.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn read(&self, group: &GroupId) -> Result<String, NotesError>;

    /// Replace the notes of `group`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::TooLarge`] for content above
    /// [`MAX_NOTES_BYTES`] (nothing is written), or an I/O error.
    fn write(&self, group: &GroupId, content: &str) -> Result<(), NotesError>;

    /// Delete the notes of `group`. Missing notes are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be modified.
    fn clear(&self, group: &GroupId) -> Result<(), NotesError>;
}

/// File-backed [`NotesStore`]: `<data_dir>/notes/<instance>/<group>.md`.
#[derive(Debug, Clone)]
pub struct FileNotesStore {
    root: PathBuf,
}

fn valid_namespace(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 64
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl FileNotesStore {
    /// Creates a store for agent `instance` under `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidNamespace`] when `instance` is not
    /// 1–64 characters of `[A-Za-z0-9_-]`.
    pub fn new(data_dir: &Path, instance: &str) -> Result<Self, ValidationError> {
        if !valid_namespace(instance) {
            return Err(ValidationError::InvalidNamespace(instance.to_string()));
        }
        Ok(Self {
            root: data_dir.join("notes").join(instance),
        })
    }

    /// Directory holding this instance's notes.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, group: &GroupId) -> PathBuf {
        self.root.join(format!("{}.md", group.as_str()))
    }
}

impl NotesStore for FileNotesStore {
    fn read(&self, group: &GroupId) -> Result<String, NotesError> {
        match std::fs::read_to_string(self.path_for(group)) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, group: &GroupId, content: &str) -> Result<(), NotesError> {
        if content.len() > MAX_NOTES_BYTES {
            return Err(ValidationError::TooLarge {
                max: MAX_NOTES_BYTES,
                actual: content.len(),
            }
            .into());
        }

        std::fs::create_dir_all(&self.root)?;
        let path = self.path_for(group);
        // Atomic save: write to a unique temp file, then rename
        let tmp_path = self
            .root
            .join(format!(".{}.{:08x}.tmp", group.as_str(), rand::random::<u32>()));
        if let Err(e) = std::fs::write(&tmp_path, content) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        if let Err(e) = std::fs::rename(&tmp_path, &path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        tracing::debug!(group = %group, bytes = content.len(), "group notes saved");
        Ok(())
    }

    fn clear(&self, group: &GroupId) -> Result<(), NotesError> {
        match std::fs::remove_file(self.path_for(group)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
