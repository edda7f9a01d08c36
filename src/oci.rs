//! Artifact packaging and OCI registry publishing.
//!
//! Hydrated manifests are packaged one item per gzipped tarball and pushed
//! with `oras`. The client sits behind a trait so the scheduler and tests
//! never depend on a registry being reachable.

use crate::error::ItemError;
use crate::process::run_logged;
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const ORAS_BIN: &str = "oras";

/// Package one item's hydrated output into `<staging>/<name>.tar.gz`.
///
/// A single combined manifest becomes a one-entry tarball named after the
/// manifest file; a split-output directory is archived under the item name.
/// Either way the artifact unpacks flat regardless of where it was built.
pub fn package_artifact(source: &Path, staging: &Path, name: &str) -> Result<PathBuf, ItemError> {
    if !source.exists() {
        return Err(ItemError::MissingManifest(source.to_path_buf()));
    }
    let artifact = staging.join(format!("{name}.tar.gz"));
    let package = || -> std::io::Result<()> {
        let file = std::fs::File::create(&artifact)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        if source.is_dir() {
            builder.append_dir_all(name, source)?;
        } else {
            let entry_name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("{name}.yaml"));
            builder.append_path_with_name(source, entry_name)?;
        }
        builder.into_inner()?.finish()?;
        Ok(())
    };
    package().map_err(|_| ItemError::Package(artifact.clone()))?;

    debug!("packaged {} -> {}", source.display(), artifact.display());
    Ok(artifact)
}

/// Pushes packaged artifacts to a registry.
#[async_trait]
pub trait OciClient: Send + Sync {
    async fn push(&self, artifact: &Path, name: &str, tags: &[String]) -> Result<(), ItemError>;
}

/// `oras push` against a fixed registry.
pub struct OrasClient {
    registry_url: String,
}

impl OrasClient {
    pub fn new(registry_url: impl Into<String>) -> Self {
        Self {
            registry_url: registry_url.into(),
        }
    }

    fn reference(&self, name: &str, tags: &[String]) -> String {
        format!("{}/{}:{}", self.registry_url, name, tags.join(","))
    }
}

#[async_trait]
impl OciClient for OrasClient {
    async fn push(&self, artifact: &Path, name: &str, tags: &[String]) -> Result<(), ItemError> {
        let reference = self.reference(name, tags);
        info!(item = %name, "publishing {} to {}", artifact.display(), reference);

        let args = vec![
            "push".to_string(),
            reference.clone(),
            artifact.display().to_string(),
            "--disable-path-validation".to_string(),
        ];
        let output = run_logged(ORAS_BIN, &args, None, name, None).await?;
        if !output.success() {
            return Err(ItemError::Publish(format!(
                "oras push {} exited with {:?}",
                reference, output.code
            )));
        }
        Ok(())
    }
}
