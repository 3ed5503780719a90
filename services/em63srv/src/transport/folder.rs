//! Exchange folder mounted into the local filesystem (SMB/NFS/WebDAV mount)

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::trace;

use super::{DirEntry, EntryKind, FileTransport};
use crate::error::{Em63Error, ErrorExt, Result};

#[derive(Debug, Clone)]
pub struct FolderTransport {
    root: PathBuf,
}

impl FolderTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a transport path below the root, refusing to leave it
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(Em63Error::transport(format!(
                "path escapes exchange root: {}",
                path
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileTransport for FolderTransport {
    async fn list(&self, folder: &str) -> Result<Vec<DirEntry>> {
        let dir = self.resolve(folder)?;
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .transport_error(&format!("list {}", dir.display()))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .transport_error(&format!("list {}", dir.display()))?
        {
            let Ok(metadata) = entry.metadata().await else {
                // Removed between readdir and stat
                continue;
            };
            let kind = if metadata.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push(DirEntry::new(kind, folder, name, modified));
        }
        trace!("Listed {} entries in {}", entries.len(), dir.display());
        Ok(entries)
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let full = self.resolve(path)?;
        let bytes = tokio::fs::read(&full)
            .await
            .transport_error(&format!("read {}", full.display()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<()> {
        let full = self.resolve(path)?;
        tokio::fs::write(&full, contents)
            .await
            .transport_error(&format!("write {}", full.display()))
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        tokio::fs::remove_file(&full)
            .await
            .transport_error(&format!("delete {}", full.display()))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_list_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("Folder-1")).unwrap();
        let transport = FolderTransport::new(dir.path());

        transport
            .write_file("Folder-1/SESS0000.REQ", "00000000 CONNECT;\r\n")
            .await
            .unwrap();

        let listing = transport.list("Folder-1").await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "SESS0000.REQ");
        assert_eq!(listing[0].base_name, "SESS0000");
        assert_eq!(listing[0].path, "Folder-1/SESS0000.REQ");
        assert!(listing[0].modified.is_some());

        let text = transport.read_file("Folder-1/SESS0000.REQ").await.unwrap();
        assert_eq!(text, "00000000 CONNECT;\r\n");

        transport.delete_file("Folder-1/SESS0000.REQ").await.unwrap();
        assert!(transport.list("Folder-1").await.unwrap().is_empty());
        assert!(transport.delete_file("Folder-1/SESS0000.REQ").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_folder_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FolderTransport::new(dir.path());
        let err = transport.list("nope").await.unwrap_err();
        assert!(matches!(err, Em63Error::TransportError(_)));
    }

    #[tokio::test]
    async fn test_rejects_parent_components() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FolderTransport::new(dir.path());
        assert!(transport.read_file("../etc/passwd").await.is_err());
        assert_eq!(transport.root(), dir.path());
    }
}
