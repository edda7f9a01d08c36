//! Item configuration records.
//!
//! One [`ItemConfig`] is a single row of the tabular source of truth: either
//! a cluster or a deployment group. The two kinds share the same accessors
//! (`name`, `group`, `tags`) but are backed by different column names, so the
//! rest of the pipeline never cares which kind it is driving.

use std::collections::{BTreeMap, BTreeSet};

/// The two kinds of hydration an item can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrateType {
    Cluster,
    Group,
}

impl HydrateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HydrateType::Cluster => "cluster",
            HydrateType::Group => "group",
        }
    }

    /// Column backing the `name` accessor for this kind.
    pub fn name_column(&self) -> &'static str {
        match self {
            HydrateType::Cluster => "cluster_name",
            HydrateType::Group => "group",
        }
    }

    /// Column backing the `group` accessor for this kind.
    pub fn group_column(&self) -> &'static str {
        match self {
            HydrateType::Cluster => "cluster_group",
            HydrateType::Group => "group",
        }
    }

    /// Column backing the `tags` accessor for this kind.
    pub fn tags_column(&self) -> &'static str {
        match self {
            HydrateType::Cluster => "cluster_tags",
            HydrateType::Group => "tags",
        }
    }
}

/// Problems found while checking one source-of-truth row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    /// A required column is absent from the source; the whole run aborts.
    MissingColumn(&'static str),
    /// A required field is present but empty; the item is skipped.
    EmptyField(&'static str),
}

/// One item's configuration, immutable once constructed.
///
/// The full row is retained as the template rendering context, so overlay
/// templates can reference any source-of-truth column by name.
#[derive(Debug, Clone)]
pub struct ItemConfig {
    kind: HydrateType,
    values: BTreeMap<String, String>,
}

impl ItemConfig {
    pub fn new(kind: HydrateType, values: BTreeMap<String, String>) -> Self {
        Self { kind, values }
    }

    pub fn kind(&self) -> HydrateType {
        self.kind
    }

    /// The full row, used as the template rendering context.
    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    pub fn name(&self) -> Option<&str> {
        self.values.get(self.kind.name_column()).map(String::as_str)
    }

    pub fn group(&self) -> Option<&str> {
        self.values
            .get(self.kind.group_column())
            .map(String::as_str)
    }

    pub fn tags(&self) -> Option<&str> {
        self.values.get(self.kind.tags_column()).map(String::as_str)
    }

    /// Explicit overlay directory override, when the row carries one.
    /// Takes precedence over the group-derived overlay.
    pub fn overlay(&self) -> Option<&str> {
        self.values
            .get("overlay")
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    /// The item's comma-split tag set, trimmed of whitespace.
    pub fn tag_set(&self) -> BTreeSet<String> {
        self.tags()
            .map(|t| {
                t.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Check the row for required columns and fields.
    ///
    /// A missing column is fatal to the run; an empty required field only
    /// skips this item.
    pub fn check(&self) -> Result<(), ConfigIssue> {
        let name = self
            .name()
            .ok_or(ConfigIssue::MissingColumn(self.kind.name_column()))?;
        if name.trim().is_empty() {
            return Err(ConfigIssue::EmptyField(self.kind.name_column()));
        }

        let group = self
            .group()
            .ok_or(ConfigIssue::MissingColumn(self.kind.group_column()))?;
        if group.trim().is_empty() {
            return Err(ConfigIssue::EmptyField(self.kind.group_column()));
        }

        self.tags()
            .ok_or(ConfigIssue::MissingColumn(self.kind.tags_column()))?;

        Ok(())
    }
}
