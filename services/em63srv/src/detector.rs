//! Response and data file detection
//!
//! The controller answers a request by writing a file with the request's
//! base name and a different extension (`SESS0000.REQ` -> `SESS0000.RSP`).
//! Data files are looked up by their exact name.

use std::sync::Arc;

use tracing::trace;

use crate::error::Result;
use crate::transport::{strip_extension, DirEntry, FileTransport};

/// One snapshot of a session folder
#[derive(Debug, Clone, Default)]
pub struct Listing {
    entries: Vec<DirEntry>,
}

impl Listing {
    pub fn new(entries: Vec<DirEntry>) -> Self {
        Self { entries }
    }

    /// Answer to `request_name`: same base name, different file name
    pub fn response_to(&self, request_name: &str) -> Option<&DirEntry> {
        let base = strip_extension(request_name);
        self.entries
            .iter()
            .find(|e| e.is_file() && e.base_name == base && e.name != request_name)
    }

    pub fn file(&self, name: &str) -> Option<&DirEntry> {
        self.entries.iter().find(|e| e.is_file() && e.name == name)
    }

    /// Every file sharing `base_name`, regardless of extension
    pub fn with_base_name<'a>(&'a self, base_name: &'a str) -> impl Iterator<Item = &'a DirEntry> {
        self.entries
            .iter()
            .filter(move |e| e.is_file() && e.base_name == base_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lists one session folder on demand
#[derive(Debug, Clone)]
pub struct ResponseDetector {
    transport: Arc<dyn FileTransport>,
    folder: String,
}

impl ResponseDetector {
    pub fn new(transport: Arc<dyn FileTransport>, folder: impl Into<String>) -> Self {
        Self {
            transport,
            folder: folder.into(),
        }
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub async fn scan(&self) -> Result<Listing> {
        let entries = self.transport.list(&self.folder).await?;
        trace!("{}: {} entries", self.folder, entries.len());
        Ok(Listing::new(entries))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::transport::{EntryKind, MemoryTransport};

    fn listing(names: &[&str]) -> Listing {
        Listing::new(
            names
                .iter()
                .map(|n| DirEntry::new(EntryKind::File, "F", *n, None))
                .collect(),
        )
    }

    #[test]
    fn test_request_alone_is_not_a_response() {
        let l = listing(&["SESS0000.REQ", "REPORT0000.JOB"]);
        assert!(l.response_to("SESS0000.REQ").is_none());
    }

    #[test]
    fn test_response_detected_by_base_name() {
        let l = listing(&["SESS0000.REQ", "SESS0000.RSP"]);
        assert_eq!(l.response_to("SESS0000.REQ").unwrap().name, "SESS0000.RSP");

        let l = listing(&["SESS0001.RSP"]);
        assert!(l.response_to("SESS0000.REQ").is_none());
    }

    #[test]
    fn test_directories_are_ignored() {
        let l = Listing::new(vec![DirEntry::new(
            EntryKind::Directory,
            "F",
            "SESS0000.RSP",
            None,
        )]);
        assert!(l.response_to("SESS0000.REQ").is_none());
        assert!(l.file("SESS0000.RSP").is_none());
    }

    #[test]
    fn test_file_lookup_and_base_name_group() {
        let l = listing(&["SESS0000.REQ", "SESS0000.RSP", "REPORT0000.DAT"]);
        assert!(l.file("REPORT0000.DAT").is_some());
        assert!(l.file("GETALARMS0000.DAT").is_none());
        assert_eq!(l.with_base_name("SESS0000").count(), 2);
        assert_eq!(l.len(), 3);
    }

    #[tokio::test]
    async fn test_scan_uses_session_folder() {
        let transport = Arc::new(MemoryTransport::new());
        transport.put("Folder-1/SESS0000.RSP", "ok");
        transport.put("Folder-2/SESS0000.RSP", "ok");

        let detector = ResponseDetector::new(transport, "Folder-1");
        let l = detector.scan().await.unwrap();
        assert_eq!(l.len(), 1);
        assert_eq!(detector.folder(), "Folder-1");
    }
}
