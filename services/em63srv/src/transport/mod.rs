//! File-exchange transport
//!
//! The controller and the adapter only ever talk through files in a shared
//! folder. [`FileTransport`] is the seam between the session logic and the
//! way that folder is reached.

mod folder;
mod memory;

pub use folder::FolderTransport;
pub use memory::MemoryTransport;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One directory listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub kind: EntryKind,
    /// File name with extension, e.g. `SESS0000.RSP`
    pub name: String,
    /// File name without its last extension, e.g. `SESS0000`
    pub base_name: String,
    /// Path usable with the other transport operations
    pub path: String,
    pub modified: Option<DateTime<Utc>>,
}

impl DirEntry {
    pub fn new(
        kind: EntryKind,
        folder: &str,
        name: impl Into<String>,
        modified: Option<DateTime<Utc>>,
    ) -> Self {
        let name = name.into();
        Self {
            kind,
            base_name: strip_extension(&name).to_string(),
            path: join_path(folder, &name),
            name,
            modified,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Drop the last `.ext` of a file name; names without one are returned unchanged
pub fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(dot) if dot + 1 < name.len() && !name[dot + 1..].contains('/') => &name[..dot],
        _ => name,
    }
}

pub fn join_path(folder: &str, name: &str) -> String {
    let folder = folder.trim_end_matches('/');
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", folder, name)
    }
}

/// Operations the adapter needs from the exchange folder.
///
/// Writes always overwrite. Paths are `folder/name` as produced by
/// [`join_path`].
#[async_trait]
pub trait FileTransport: Send + Sync + std::fmt::Debug {
    async fn list(&self, folder: &str) -> Result<Vec<DirEntry>>;

    async fn read_file(&self, path: &str) -> Result<String>;

    async fn write_file(&self, path: &str, contents: &str) -> Result<()>;

    async fn delete_file(&self, path: &str) -> Result<()>;
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_extension() {
        assert_eq!(strip_extension("SESS0000.REQ"), "SESS0000");
        assert_eq!(strip_extension("SESS0000.RSP"), "SESS0000");
        assert_eq!(strip_extension("archive.tar.gz"), "archive.tar");
        assert_eq!(strip_extension("README"), "README");
        assert_eq!(strip_extension("trailing."), "trailing.");
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("Folder-1", "SESS0000.REQ"), "Folder-1/SESS0000.REQ");
        assert_eq!(join_path("Folder-1/", "a"), "Folder-1/a");
        assert_eq!(join_path("", "a"), "a");
    }

    #[test]
    fn test_dir_entry_fields() {
        let entry = DirEntry::new(EntryKind::File, "Folder-1", "REPORT0000.DAT", None);
        assert_eq!(entry.base_name, "REPORT0000");
        assert_eq!(entry.path, "Folder-1/REPORT0000.DAT");
        assert!(entry.is_file());
    }
}
