//! Per-item hydration.
//!
//! A [`HydrationUnit`] carries one source-of-truth item through the whole
//! pipeline: overlay resolution, staging-tree composition, the kustomize
//! build, the optional split pass, validators, and publishing. Failures are
//! recorded per stage on the unit's [`StageStatus`] and never abort sibling
//! items.

use crate::compose::{SourceLayout, TreeComposer};
use crate::error::ItemError;
use crate::item::{HydrateType, ItemConfig};
use crate::krm::{
    self, dump_documents, is_valid_resource, parse_documents, remove_annotation,
    ProvenanceTracker, PROVENANCE_ANNOTATION,
};
use crate::oci::{package_artifact, OciClient};
use crate::process::run_logged;
use crate::validator::Validator;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const KUSTOMIZE_BIN: &str = "kustomize";

/// Where each item's output lands under the hydrated root when the run is
/// not splitting output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSubdir {
    /// One directory per group, shared by the group's items.
    Group,
    /// One directory per item.
    Cluster,
    /// Everything directly under the hydrated root.
    None,
}

/// Per-stage outcome flags for one item. All stages start as passing; a
/// stage that never ran because an earlier one failed stays passing, so
/// the report only names the stage that actually broke.
#[derive(Debug, Clone, Default)]
pub struct StageStatus {
    preflight_failed: bool,
    template_failed: bool,
    kustomize_failed: bool,
    split_failed: bool,
    publish_failed: bool,
    validators: Vec<(String, bool)>,
}

impl StageStatus {
    pub fn ok(&self) -> bool {
        !self.preflight_failed
            && !self.template_failed
            && !self.kustomize_failed
            && !self.split_failed
            && !self.publish_failed
            && self.validators.iter().all(|(_, valid)| *valid)
    }

    /// Labels of the stages that failed, in pipeline order.
    pub fn failed_stages(&self) -> Vec<String> {
        let mut stages = Vec::new();
        if self.preflight_failed {
            stages.push("pre-flight".to_string());
        }
        if self.template_failed {
            stages.push("template".to_string());
        }
        if self.kustomize_failed {
            stages.push("kustomize".to_string());
        }
        if self.split_failed {
            stages.push("split output".to_string());
        }
        for (name, valid) in &self.validators {
            if !valid {
                stages.push(name.clone());
            }
        }
        if self.publish_failed {
            stages.push("OCI publish".to_string());
        }
        stages
    }

    fn build_ok(&self) -> bool {
        !self.template_failed && !self.kustomize_failed && !self.split_failed
    }

    /// Attribute a composition failure to the stage that caused it: render
    /// errors to the template stage, manifest-parse errors to the split
    /// stage, anything else (I/O and the like) to pre-flight.
    fn record_compose_failure(&mut self, err: &ItemError) {
        match err {
            ItemError::Template { .. } => self.template_failed = true,
            ItemError::Yaml { .. } => self.split_failed = true,
            _ => self.preflight_failed = true,
        }
    }
}

/// Run-wide configuration shared by every hydration unit.
pub struct SharedConfig {
    pub layout: SourceLayout,
    /// Root directory holding per-group overlays.
    pub overlays_path: PathBuf,
    /// Overlay directory name used when an item's group has none.
    pub default_overlay: Option<String>,
    pub hydrated_path: PathBuf,
    pub output_subdir: OutputSubdir,
    pub split_output: bool,
    pub build_timeout: Duration,
    /// Parent for per-item staging directories; system temp when unset.
    pub temp_root: Option<PathBuf>,
    pub preserve_temp: bool,
    pub composer: TreeComposer,
    pub tracker: Option<Arc<ProvenanceTracker>>,
    pub validators: Vec<Arc<dyn Validator>>,
    pub oci: Option<Arc<dyn OciClient>>,
    pub oci_tags: Vec<String>,
}

/// Per-item staging directory, removed on drop unless preservation was
/// requested.
pub struct StagingDir {
    path: PathBuf,
    preserve: bool,
}

impl StagingDir {
    pub fn create(root: Option<&Path>, item: &str, preserve: bool) -> std::io::Result<Self> {
        let root = root
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        let path = root.join(format!("hydrate-{}-{}", std::process::id(), item));
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        std::fs::create_dir_all(&path)?;
        Ok(Self { path, preserve })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.preserve {
            info!("preserving staging directory {}", self.path.display());
        } else if let Err(err) = std::fs::remove_dir_all(&self.path) {
            warn!(
                "failed to remove staging directory {}: {}",
                self.path.display(),
                err
            );
        }
    }
}

/// One item's journey through the pipeline.
pub struct HydrationUnit {
    item: ItemConfig,
    shared: Arc<SharedConfig>,
    status: StageStatus,
}

impl HydrationUnit {
    pub fn new(item: ItemConfig, shared: Arc<SharedConfig>) -> Self {
        Self {
            item,
            shared,
            status: StageStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        self.item.name().unwrap_or_default()
    }

    pub fn status(&self) -> &StageStatus {
        &self.status
    }

    /// Mark the unit failed before it ever ran, used when its worker died.
    pub fn fail_preflight(&mut self) {
        self.status.preflight_failed = true;
    }

    /// Resolve the item's overlay directory: an explicit per-item override
    /// wins, then the group's own overlay, then the configured default.
    /// An item with no resolvable overlay fails pre-flight; no build is
    /// attempted without one.
    fn resolve_overlay(&self) -> Result<PathBuf, ItemError> {
        if let Some(name) = self.item.overlay() {
            let overlay = self.shared.overlays_path.join(name);
            if overlay.is_dir() {
                return Ok(overlay);
            }
            return Err(ItemError::MissingOverlay {
                group: name.to_string(),
            });
        }

        let group = self.item.group().unwrap_or_default();
        let group_overlay = self.shared.overlays_path.join(group);
        if group_overlay.is_dir() {
            return Ok(group_overlay);
        }

        if let Some(default) = &self.shared.default_overlay {
            let default_overlay = self.shared.overlays_path.join(default);
            if default_overlay.is_dir() {
                info!(
                    item = %self.name(),
                    "no overlay for group '{}'; using default overlay '{}'",
                    group,
                    default
                );
                return Ok(default_overlay);
            }
        }

        Err(ItemError::MissingOverlay {
            group: group.to_string(),
        })
    }

    /// Destination directory for this item's build output.
    fn dest_dir(&self) -> PathBuf {
        let root = &self.shared.hydrated_path;
        let group = self.item.group().unwrap_or_default();
        let name = self.name();

        if self.shared.split_output {
            return match self.item.kind() {
                HydrateType::Cluster => root.join(group).join(name),
                HydrateType::Group => root.join(name),
            };
        }
        match self.shared.output_subdir {
            OutputSubdir::Cluster => root.join(name),
            OutputSubdir::Group => root.join(group),
            OutputSubdir::None => root.clone(),
        }
    }

    pub async fn run(&mut self) {
        let name = self.name().to_string();
        info!(
            item = %name,
            "hydrating {} '{}'",
            self.item.kind().as_str(),
            name
        );

        let overlay = match self.resolve_overlay() {
            Ok(overlay) => overlay,
            Err(err) => {
                warn!(item = %name, "{}", err);
                self.status.preflight_failed = true;
                return;
            }
        };

        let staging = match StagingDir::create(
            self.shared.temp_root.as_deref(),
            &name,
            self.shared.preserve_temp,
        ) {
            Ok(staging) => staging,
            Err(err) => {
                warn!(item = %name, "failed to create staging directory: {}", err);
                self.status.preflight_failed = true;
                return;
            }
        };

        // the overlay is staged under its own directory name, which is the
        // group name except when the default overlay stood in
        let overlay_name = overlay
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if let Err(err) = self
            .shared
            .composer
            .compose(
                staging.path(),
                &self.shared.layout,
                Some(&overlay),
                &overlay_name,
                &self.item,
            )
            .await
        {
            warn!(item = %name, "composition failed: {}", err);
            self.status.record_compose_failure(&err);
            return;
        }

        let dest = self.dest_dir();
        let dest = match prepare_dest(&dest).await {
            Ok(dest) => dest,
            Err(err) => {
                warn!(item = %name, "failed to prepare output directory: {}", err);
                self.status.preflight_failed = true;
                return;
            }
        };
        let manifest = dest.join(format!("{name}.yaml"));

        let build_cwd = staging
            .path()
            .join(&self.shared.layout.overlays_name)
            .join(&overlay_name);
        if let Err(err) = self.build(&build_cwd, &manifest, &name).await {
            warn!(item = %name, "kustomize build failed: {}", err);
            self.status.kustomize_failed = true;
        }

        if self.shared.split_output && !self.status.kustomize_failed {
            if let Err(err) = self.split_manifest(&manifest, &dest, &name).await {
                warn!(item = %name, "split pass failed: {}", err);
                self.status.split_failed = true;
            }
        }

        if self.status.build_ok() {
            let target = if self.shared.split_output {
                dest.clone()
            } else {
                manifest.clone()
            };
            for validator in &self.shared.validators {
                let valid = validator.run(&self.item, &target).await;
                self.status
                    .validators
                    .push((validator.name().to_string(), valid));
            }
        }

        if self.status.ok() {
            if let Some(client) = &self.shared.oci {
                let source = if self.shared.split_output {
                    dest.clone()
                } else {
                    manifest.clone()
                };
                if let Err(err) = self.publish(client.as_ref(), &source, staging.path()).await {
                    warn!(item = %name, "publish failed: {}", err);
                    self.status.publish_failed = true;
                }
            }
        }
    }

    async fn build(&self, cwd: &Path, manifest: &Path, name: &str) -> Result<(), ItemError> {
        let args = vec![
            "build".to_string(),
            ".".to_string(),
            "-o".to_string(),
            manifest.display().to_string(),
        ];
        let output = run_logged(
            KUSTOMIZE_BIN,
            &args,
            Some(cwd),
            name,
            Some(self.shared.build_timeout),
        )
        .await?;
        if !output.success() {
            return Err(ItemError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("kustomize exited with {:?}", output.code),
            )));
        }
        Ok(())
    }

    /// Route each document of the combined manifest back to a per-source
    /// file under the destination, using recorded provenance. Documents with
    /// no resolvable source stay behind in the combined manifest; when every
    /// document resolves, the combined manifest is removed.
    async fn split_manifest(
        &self,
        manifest: &Path,
        dest: &Path,
        name: &str,
    ) -> Result<(), ItemError> {
        let Some(tracker) = &self.shared.tracker else {
            return Ok(());
        };

        let content = tokio::fs::read_to_string(manifest).await?;
        let docs = parse_documents(&content).map_err(|source| ItemError::Yaml {
            path: manifest.to_path_buf(),
            source,
        })?;

        let base_name = self.shared.layout.base_name().to_os_string();
        let mut files: HashMap<PathBuf, String> = HashMap::new();
        let mut unresolved = Vec::new();

        for mut doc in docs {
            if !is_valid_resource(&doc) {
                warn!(
                    item = %name,
                    "skipping build output document: not a structured resource"
                );
                continue;
            }

            let Some(source_rel) = tracker.resolve_path(&doc, name) else {
                debug!(
                    item = %name,
                    "no provenance for {} '{}'; leaving in combined manifest",
                    krm::doc_kind(&doc).unwrap_or("<unknown>"),
                    krm::doc_name(&doc).unwrap_or("<unnamed>")
                );
                unresolved.push(doc);
                continue;
            };

            if !remove_annotation(&mut doc, PROVENANCE_ANNOTATION) {
                debug!(item = %name, "document resolved without its annotation");
            }

            let target = dest.join(strip_components(&source_rel, &base_name));
            let serialized = dump_documents(std::slice::from_ref(&doc), true)
                .map_err(|source| ItemError::Yaml {
                    path: target.clone(),
                    source,
                })?;
            files.entry(target).or_default().push_str(&serialized);
        }

        for (target, contents) in &files {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(target, contents).await?;
        }

        if unresolved.is_empty() {
            tokio::fs::remove_file(manifest).await?;
            debug!(item = %name, "all documents split; removed combined manifest");
        } else {
            let remainder =
                dump_documents(&unresolved, true).map_err(|source| ItemError::Yaml {
                    path: manifest.to_path_buf(),
                    source,
                })?;
            tokio::fs::write(manifest, remainder).await?;
            warn!(
                item = %name,
                "{} document(s) had no recorded source; kept in {}",
                unresolved.len(),
                manifest.display()
            );
        }

        Ok(())
    }

    async fn publish(
        &self,
        client: &dyn OciClient,
        source: &Path,
        staging: &Path,
    ) -> Result<(), ItemError> {
        let artifact = package_artifact(source, staging, self.name())?;
        client
            .push(&artifact, self.name(), &self.shared.oci_tags)
            .await
    }
}

/// Create the destination directory and return its absolute form, so the
/// build tool's `-o` target is valid from any working directory.
async fn prepare_dest(dest: &Path) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dest).await?;
    tokio::fs::canonicalize(dest).await
}

/// Drop path components matching `name`, relocating base-library sources to
/// the destination root.
fn strip_components(path: &Path, name: &OsStr) -> PathBuf {
    path.components()
        .filter(|c| match c {
            Component::Normal(part) => *part != name,
            _ => true,
        })
        .collect()
}
