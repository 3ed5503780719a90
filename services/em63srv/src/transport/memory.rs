//! In-memory exchange folder
//!
//! Can play the controller side: with auto-response enabled every `.REQ`
//! write is answered by a `.RSP` file next to it. Faults can be injected
//! per file name or for listings, and every write is recorded.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{join_path, strip_extension, DirEntry, EntryKind, FileTransport};
use crate::error::{Em63Error, Result};

#[derive(Debug, Clone)]
struct MemoryFile {
    contents: String,
    modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<String, MemoryFile>,
    auto_response: bool,
    failing_names: HashSet<String>,
    failing_listing: bool,
    writes: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that answers every request like a live controller
    pub fn with_auto_response() -> Self {
        let transport = Self::new();
        transport.set_auto_response(true);
        transport
    }

    pub fn set_auto_response(&self, enabled: bool) {
        self.state.lock().auto_response = enabled;
    }

    /// Place a file the way the controller would (not recorded as a write)
    pub fn put(&self, path: &str, contents: &str) {
        self.put_with_time(path, contents, Utc::now());
    }

    pub fn put_with_time(&self, path: &str, contents: &str, modified: DateTime<Utc>) {
        self.state.lock().files.insert(
            path.to_string(),
            MemoryFile {
                contents: contents.to_string(),
                modified,
            },
        );
    }

    pub fn contents(&self, path: &str) -> Option<String> {
        self.state.lock().files.get(path).map(|f| f.contents.clone())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state.lock().files.contains_key(path)
    }

    /// Every successful write as `(path, contents)`, oldest first
    pub fn writes(&self) -> Vec<(String, String)> {
        self.state.lock().writes.clone()
    }

    pub fn write_count(&self, path: &str) -> usize {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|(p, _)| p == path)
            .count()
    }

    /// Fail reads, writes and deletes of files with this name in any folder
    pub fn fail_file(&self, name: &str) {
        self.state.lock().failing_names.insert(name.to_string());
    }

    pub fn set_listing_failure(&self, failing: bool) {
        self.state.lock().failing_listing = failing;
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failing_names.clear();
        state.failing_listing = false;
    }

    fn check(state: &MemoryState, path: &str) -> Result<()> {
        let name = path.rsplit('/').next().unwrap_or(path);
        if state.failing_names.contains(name) {
            return Err(Em63Error::transport(format!("injected failure on {}", path)));
        }
        Ok(())
    }
}

#[async_trait]
impl FileTransport for MemoryTransport {
    async fn list(&self, folder: &str) -> Result<Vec<DirEntry>> {
        let state = self.state.lock();
        if state.failing_listing {
            return Err(Em63Error::transport(format!(
                "injected listing failure on {}",
                folder
            )));
        }
        let prefix = join_path(folder, "");
        Ok(state
            .files
            .iter()
            .filter_map(|(path, file)| {
                let name = path.strip_prefix(&prefix)?;
                (!name.is_empty() && !name.contains('/')).then(|| {
                    DirEntry::new(EntryKind::File, folder, name, Some(file.modified))
                })
            })
            .collect())
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let state = self.state.lock();
        Self::check(&state, path)?;
        state
            .files
            .get(path)
            .map(|f| f.contents.clone())
            .ok_or_else(|| Em63Error::transport(format!("no such file: {}", path)))
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<()> {
        let mut state = self.state.lock();
        Self::check(&state, path)?;
        let now = Utc::now();
        state.files.insert(
            path.to_string(),
            MemoryFile {
                contents: contents.to_string(),
                modified: now,
            },
        );
        state.writes.push((path.to_string(), contents.to_string()));

        if state.auto_response && path.ends_with(".REQ") {
            let tag = contents.split_whitespace().next().unwrap_or("00000000");
            state.files.insert(
                format!("{}.RSP", strip_extension(path)),
                MemoryFile {
                    contents: format!("{} COMMAND 1 PROCESSED \"OK\";\r\n", tag),
                    modified: now,
                },
            );
        }
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let mut state = self.state.lock();
        Self::check(&state, path)?;
        state
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Em63Error::transport(format!("no such file: {}", path)))
    }
}
