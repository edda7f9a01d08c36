//! Error types for the hydration pipeline.
//!
//! Two severities, mirroring the run/item split in the pipeline: a
//! [`FatalError`] aborts the run before any item is hydrated, while an
//! [`ItemError`] is recorded against a single item's stage flags and never
//! stops sibling items.

use std::path::PathBuf;
use thiserror::Error;

/// Run-level errors. Any of these aborts the whole run with a non-zero,
/// non-one exit code before (or instead of) hydrating items.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("source of truth is missing required column '{0}'")]
    MissingColumn(String),

    #[error("could not find '{0}' in the path")]
    ToolNotFound(String),

    #[error("provided path ({0}) does not exist or is not a directory")]
    InvalidPath(PathBuf),

    #[error("constraint path {0} does not exist")]
    MissingConstraintPath(PathBuf),

    #[error("failed to read source of truth: {0}")]
    Sot(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Item-level errors. Recorded against the offending item's stage status;
/// the run continues and exits 1 if any item carries one.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("no overlay found for group '{group}' and no default overlay applicable")]
    MissingOverlay { group: String },

    #[error("error rendering template {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: minijinja::Error,
    },

    #[error("error parsing YAML from {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("could not find '{0}' in the path")]
    ToolNotFound(String),

    #[error("{tool} exceeded the {secs}s timeout and was killed")]
    ProcessTimeout { tool: String, secs: u64 },

    #[error("rendered manifest not found: {0}")]
    MissingManifest(PathBuf),

    #[error("failed to package artifact {0}")]
    Package(PathBuf),

    #[error("publish to registry failed: {0}")]
    Publish(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
