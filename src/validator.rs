//! Post-build manifest validation.
//!
//! Validators run against the combined (or split) build output after the
//! build tool succeeds. Every configured validator runs even when an earlier
//! one fails, so one report covers all findings for an item.

use crate::error::FatalError;
use crate::item::ItemConfig;
use crate::process::run_logged;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A named validation pass over an item's hydrated output.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Stage label the validator's result is reported under.
    fn name(&self) -> &'static str;

    /// Validate one item's hydrated output directory. Returns whether the
    /// output passed; failures to run at all count as not passing.
    async fn run(&self, item: &ItemConfig, hydrated: &Path) -> bool;
}

const GATOR_BIN: &str = "gator";

/// Gatekeeper policy validation via `gator test`.
#[derive(Debug)]
pub struct Gatekeeper {
    constraint_paths: Vec<PathBuf>,
}

impl Gatekeeper {
    /// Check the configured constraint paths up front; a missing path aborts
    /// the run rather than silently validating against nothing.
    pub fn new(constraint_paths: Vec<PathBuf>) -> Result<Self, FatalError> {
        for path in &constraint_paths {
            if !path.exists() {
                return Err(FatalError::MissingConstraintPath(path.clone()));
            }
        }
        Ok(Self { constraint_paths })
    }

    /// Expand constraint roots for one item: a root holding a subdirectory
    /// named after the item's group, or `all`, contributes those
    /// subdirectories instead of itself.
    fn constraints_for(&self, item: &ItemConfig) -> Vec<PathBuf> {
        let group = item.group().unwrap_or_default();
        let mut expanded = Vec::new();
        for root in &self.constraint_paths {
            let group_dir = root.join(group);
            let all_dir = root.join("all");
            let mut matched = false;
            if group_dir.is_dir() {
                expanded.push(group_dir);
                matched = true;
            }
            if all_dir.is_dir() {
                expanded.push(all_dir);
                matched = true;
            }
            if !matched {
                expanded.push(root.clone());
            }
        }
        expanded
    }
}

#[async_trait]
impl Validator for Gatekeeper {
    fn name(&self) -> &'static str {
        "gatekeeper"
    }

    async fn run(&self, item: &ItemConfig, hydrated: &Path) -> bool {
        let name = item.name().unwrap_or_default();
        let mut args = vec!["test".to_string()];
        args.push("-f".to_string());
        args.push(hydrated.display().to_string());
        for constraint in self.constraints_for(item) {
            args.push("-f".to_string());
            args.push(constraint.display().to_string());
        }

        debug!(item = %name, "running gatekeeper validation");
        match run_logged(GATOR_BIN, &args, None, name, None).await {
            Ok(output) if output.success() => true,
            Ok(output) => {
                warn!(
                    item = %name,
                    "gatekeeper validation failed with exit code {:?}",
                    output.code
                );
                false
            }
            Err(err) => {
                warn!(item = %name, "gatekeeper validation did not run: {}", err);
                false
            }
        }
    }
}
