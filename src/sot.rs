//! Source-of-truth parsing and item selection.
//!
//! The source of truth is a CSV file with one row per item. Rows keyed by an
//! empty name are skipped with a warning; missing required columns abort the
//! run before any hydration starts.

use crate::error::FatalError;
use crate::item::{ConfigIssue, HydrateType, ItemConfig};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, warn};

/// Parsed source of truth: item name to configuration, ordered by name.
pub type SotConfig = BTreeMap<String, ItemConfig>;

/// Read and validate the source-of-truth file.
///
/// Later rows with a duplicate name replace earlier ones. Rows failing a
/// recoverable check are skipped with a warning; a missing required column is
/// fatal.
pub fn load_sot(path: &Path, kind: HydrateType) -> Result<SotConfig, FatalError> {
    debug!("processing source of truth file: {}", path.display());
    let mut reader = csv::Reader::from_path(path)?;

    let mut data = SotConfig::new();
    for (idx, record) in reader.deserialize::<BTreeMap<String, String>>().enumerate() {
        let line = idx + 2; // header occupies line 1
        let row = record?;
        let trimmed = row
            .into_iter()
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        let cfg = ItemConfig::new(kind, trimmed);

        match cfg.check() {
            Ok(()) => {}
            Err(ConfigIssue::EmptyField(field)) => {
                warn!("skipping line {}: got empty value for '{}'", line, field);
                continue;
            }
            Err(ConfigIssue::MissingColumn(column)) => {
                return Err(FatalError::MissingColumn(column.to_string()));
            }
        }

        // check() guarantees a non-empty name
        let name = cfg.name().unwrap_or_default().to_string();
        data.insert(name, cfg);
    }

    Ok(data)
}

/// Item selection by name, group, and tag, all optional.
///
/// An empty selector set for a dimension means "no constraint". Tag
/// selection intersects with the item's comma-split tag set.
#[derive(Debug, Clone, Default)]
pub struct Selector {
    pub names: BTreeSet<String>,
    pub groups: BTreeSet<String>,
    pub tags: BTreeSet<String>,
}

impl Selector {
    pub fn matches(&self, item: &ItemConfig) -> bool {
        let shown = item.name().unwrap_or("<unnamed>");

        if !self.names.is_empty() {
            if !item.name().map_or(false, |n| self.names.contains(n)) {
                debug!("'{}': not in provided name selectors; not hydrating", shown);
                return false;
            }
        }

        if !self.groups.is_empty() {
            if !item.group().map_or(false, |g| self.groups.contains(g)) {
                debug!(
                    "'{}': not in provided group selectors; not hydrating",
                    shown
                );
                return false;
            }
        }

        if !self.tags.is_empty() {
            let item_tags = item.tag_set();
            if item_tags.is_empty() {
                warn!(
                    "'{}': tags given as selectors but item has none configured",
                    shown
                );
                return false;
            }
            if item_tags.intersection(&self.tags).next().is_none() {
                debug!("'{}': no matching tags; not hydrating", shown);
                return false;
            }
        }

        true
    }

    /// Apply the selector to a full parsed source of truth.
    pub fn select(&self, config: SotConfig) -> SotConfig {
        config
            .into_iter()
            .filter(|(_, cfg)| self.matches(cfg))
            .collect()
    }
}
