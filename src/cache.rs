//! In-memory file content cache.
//!
//! Base-library and module files are identical across every item in a run,
//! so each distinct template-root-relative path is read from disk exactly
//! once and shared read-only across all in-flight hydrations. Entries are
//! append-only for the lifetime of the cache; template roots are treated as
//! immutable while a run is in progress, so no invalidation is needed.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Per-run cache of decoded file contents, keyed by template-root-relative
/// path. Constructed once per run and shared via `Arc`.
#[derive(Debug, Default)]
pub struct FileCache {
    entries: RwLock<HashMap<PathBuf, Arc<String>>>,
}

impl FileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the contents for `key`, reading `source` on the first request.
    ///
    /// `key` must be the path relative to its template root, never the
    /// staging-tree path, so items sharing base-library files hit the same
    /// entry.
    pub async fn get_or_load(&self, key: &Path, source: &Path) -> std::io::Result<Arc<String>> {
        if let Some(contents) = self.entries.read().get(key) {
            return Ok(Arc::clone(contents));
        }

        let contents = Arc::new(tokio::fs::read_to_string(source).await?);
        let mut entries = self.entries.write();
        // another task may have loaded the same key while we were reading
        let entry = entries
            .entry(key.to_path_buf())
            .or_insert_with(|| Arc::clone(&contents));
        Ok(Arc::clone(entry))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}
