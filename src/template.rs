//! Per-file template rendering.
//!
//! Files carrying a `.j2` suffix are rendered through minijinja with the
//! item's full source-of-truth row as the context; everything else is copied
//! verbatim. Render failures are fatal to the item, not the run, and carry
//! the offending template's origin path.

use crate::error::ItemError;
use minijinja::Environment;
use std::collections::BTreeMap;
use std::path::Path;

/// File-name suffix marking a file as a template.
pub const TEMPLATE_SUFFIX: &str = "j2";

/// Returns true when the file should be rendered rather than copied.
pub fn is_template(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext == TEMPLATE_SUFFIX)
}

/// Strip the template suffix from a destination file name.
pub fn strip_template_suffix(path: &Path) -> std::path::PathBuf {
    if is_template(path) {
        path.with_extension("")
    } else {
        path.to_path_buf()
    }
}

/// Template engine shared by all items in a run.
///
/// Undefined variables render as empty rather than failing, matching how
/// sparse source-of-truth rows are expected to behave.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self {
            env: Environment::new(),
        }
    }

    /// Render a template string against an item's configuration row.
    ///
    /// `origin` identifies the source file for error reporting only.
    pub fn render(
        &self,
        source: &str,
        context: &BTreeMap<String, String>,
        origin: &Path,
    ) -> Result<String, ItemError> {
        self.env
            .render_str(source, context)
            .map_err(|source| ItemError::Template {
                path: origin.to_path_buf(),
                source,
            })
    }
}
