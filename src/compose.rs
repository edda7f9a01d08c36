//! Staging-tree composition.
//!
//! Each item gets a private staging tree assembled from three sources: the
//! shared base library, the item's resolved overlay, and the optional modules
//! directory. Files are pulled through the run's shared [`FileCache`],
//! rendered when they carry the template suffix, and (in split mode) pushed
//! through the provenance tracker so the later split pass can route build
//! output back to source paths.

use crate::cache::FileCache;
use crate::error::ItemError;
use crate::item::ItemConfig;
use crate::krm::ProvenanceTracker;
use crate::template::{is_template, strip_template_suffix, TemplateEngine};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use walkdir::WalkDir;

/// The source directories a run composes from. Shared by every item; the
/// per-item overlay is resolved separately.
#[derive(Debug, Clone)]
pub struct SourceLayout {
    /// Base library root, staged under its own directory name.
    pub base_path: PathBuf,
    /// Optional modules root, staged inside the base directory.
    pub modules_path: PathBuf,
    /// Directory name overlays are staged under, also used by the split pass
    /// to recognize overlay-owned resource lists.
    pub overlays_name: String,
}

impl SourceLayout {
    /// Directory name the base library (and modules) are staged under.
    pub fn base_name(&self) -> &std::ffi::OsStr {
        self.base_path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("base"))
    }
}

/// Composes one item's staging tree.
pub struct TreeComposer {
    cache: Arc<FileCache>,
    engine: Arc<TemplateEngine>,
    tracker: Option<Arc<ProvenanceTracker>>,
}

impl TreeComposer {
    /// `tracker` is present only in split mode; without it staged files are
    /// written exactly as rendered.
    pub fn new(
        cache: Arc<FileCache>,
        engine: Arc<TemplateEngine>,
        tracker: Option<Arc<ProvenanceTracker>>,
    ) -> Self {
        Self {
            cache,
            engine,
            tracker,
        }
    }

    /// Assemble the staging tree for one item.
    ///
    /// `overlay` is the item's resolved overlay directory, already checked
    /// for existence; `group` names the subdirectory it is staged under.
    pub async fn compose(
        &self,
        staging: &Path,
        layout: &SourceLayout,
        overlay: Option<&Path>,
        group: &str,
        item: &ItemConfig,
    ) -> Result<(), ItemError> {
        let base_dest = staging.join(layout.base_name());
        self.stage_tree(&layout.base_path, &base_dest, staging, item)
            .await?;

        if layout.modules_path.is_dir() {
            let modules_dest = base_dest.join("modules");
            self.stage_tree(&layout.modules_path, &modules_dest, staging, item)
                .await?;
        }

        if let Some(overlay) = overlay {
            let overlay_dest = staging.join(&layout.overlays_name).join(group);
            self.stage_tree(overlay, &overlay_dest, staging, item)
                .await?;
        }

        Ok(())
    }

    async fn stage_tree(
        &self,
        src_root: &Path,
        dest_root: &Path,
        staging: &Path,
        item: &ItemConfig,
    ) -> Result<(), ItemError> {
        let item_id = item.name().unwrap_or_default().to_string();
        debug!(
            item = %item_id,
            "staging {} -> {}",
            src_root.display(),
            dest_root.display()
        );

        let walker = WalkDir::new(src_root)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git");

        for entry in walker {
            let entry = entry.map_err(|e| {
                ItemError::Io(e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::Other, "walk error")
                }))
            })?;
            let rel = entry
                .path()
                .strip_prefix(src_root)
                .expect("walkdir yields paths under its root");

            if entry.file_type().is_dir() {
                tokio::fs::create_dir_all(dest_root.join(rel)).await?;
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }

            // raw contents are shared across items, so the cache key must be
            // the pre-render destination path relative to the staging root
            let raw_dest = dest_root.join(rel);
            let cache_key = raw_dest
                .strip_prefix(staging)
                .expect("destination lies under the staging root")
                .to_path_buf();
            let raw = self.cache.get_or_load(&cache_key, entry.path()).await?;

            let content = if is_template(&raw_dest) {
                self.engine.render(&raw, item.values(), entry.path())?
            } else {
                raw.as_ref().clone()
            };

            let dest = strip_template_suffix(&raw_dest);
            let staged_rel = dest
                .strip_prefix(staging)
                .expect("destination lies under the staging root");

            let content = match &self.tracker {
                Some(tracker) if is_manifest(&dest) => tracker
                    .record_documents(&content, staged_rel, &item_id)?
                    .unwrap_or(content),
                _ => content,
            };

            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&dest, content).await?;
        }

        Ok(())
    }
}

fn is_manifest(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}
