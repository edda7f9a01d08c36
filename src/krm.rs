//! Structured resource documents and provenance tracking.
//!
//! While source files are rendered into the staging tree, every manifest
//! document is assigned a stable, content-derived identity and the source
//! path that produced it is remembered. After the build tool flattens the
//! tree into one combined manifest, those identities are what let the split
//! pass route each document back to a per-resource file.

use crate::error::ItemError;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Annotation carrying a document's assigned identity between the render
/// and split passes, so the identity survives whatever the build tool does
/// to the document in between.
pub const PROVENANCE_ANNOTATION: &str = "hydrator-uid";

/// Document kind that declares an overlay's resource list instead of being
/// a deployable resource itself.
const RESOURCE_LIST_KIND: &str = "Kustomization";

/// Parse a string into its constituent YAML documents.
pub fn parse_documents(content: &str) -> Result<Vec<Value>, serde_yaml::Error> {
    let mut docs = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        docs.push(Value::deserialize(document)?);
    }
    Ok(docs)
}

/// Serialize documents back to a multi-document string.
///
/// With `explicit_start`, every document is prefixed with a `---` marker;
/// otherwise markers only separate documents.
pub fn dump_documents(docs: &[Value], explicit_start: bool) -> Result<String, serde_yaml::Error> {
    let mut out = String::new();
    for (i, doc) in docs.iter().enumerate() {
        if explicit_start || i > 0 {
            out.push_str("---\n");
        }
        out.push_str(&serde_yaml::to_string(doc)?);
    }
    Ok(out)
}

/// A document is a structured resource when it is a mapping carrying both an
/// API-version and a kind.
pub fn is_valid_resource(doc: &Value) -> bool {
    doc.is_mapping() && doc.get("apiVersion").is_some() && doc.get("kind").is_some()
}

pub fn doc_kind(doc: &Value) -> Option<&str> {
    doc.get("kind").and_then(Value::as_str)
}

pub fn doc_name(doc: &Value) -> Option<&str> {
    doc.get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
}

pub fn doc_namespace(doc: &Value) -> Option<&str> {
    doc.get("metadata")
        .and_then(|m| m.get("namespace"))
        .and_then(Value::as_str)
}

/// Read an annotation off a document, if present.
pub fn get_annotation<'a>(doc: &'a Value, key: &str) -> Option<&'a str> {
    doc.get("metadata")
        .and_then(|m| m.get("annotations"))
        .and_then(|a| a.get(key))
        .and_then(Value::as_str)
}

/// Set an annotation on a document, creating the metadata/annotations
/// mappings as needed.
pub fn set_annotation(doc: &mut Value, key: &str, value: &str) {
    let Some(mapping) = doc.as_mapping_mut() else {
        return;
    };
    let metadata = mapping
        .entry(Value::from("metadata"))
        .or_insert_with(|| Value::Mapping(Default::default()));
    if !metadata.is_mapping() {
        return;
    }
    let annotations = metadata
        .as_mapping_mut()
        .expect("checked mapping above")
        .entry(Value::from("annotations"))
        .or_insert_with(|| Value::Mapping(Default::default()));
    if let Some(a) = annotations.as_mapping_mut() {
        a.insert(Value::from(key), Value::from(value));
    }
}

/// Remove an annotation from a document. Returns true when it was present.
/// A mapping left empty by the removal is dropped with it, so documents
/// that were only ever annotated by the pipeline come back out untouched.
pub fn remove_annotation(doc: &mut Value, key: &str) -> bool {
    let Some(metadata) = doc.get_mut("metadata").and_then(Value::as_mapping_mut) else {
        return false;
    };
    let removed = metadata
        .get_mut("annotations")
        .and_then(Value::as_mapping_mut)
        .and_then(|a| a.remove(key))
        .is_some();
    let emptied = metadata
        .get("annotations")
        .and_then(Value::as_mapping)
        .map_or(false, |a| a.is_empty());
    if emptied {
        metadata.remove("annotations");
    }
    removed
}

/// Hex digest of arbitrary bytes.
pub fn digest(data: &str) -> String {
    blake3::hash(data.as_bytes()).to_hex().to_string()
}

/// A document's stable identity: the previously-assigned provenance
/// annotation when present, otherwise a digest of the document's canonical
/// (sorted-key JSON) form. Returns None for documents that cannot be
/// canonicalized.
pub fn resource_identity(doc: &Value) -> Option<String> {
    if let Some(existing) = get_annotation(doc, PROVENANCE_ANNOTATION) {
        return Some(existing.to_string());
    }
    // serde_json's object representation sorts keys, giving a canonical form
    let canonical = serde_json::to_value(doc).ok()?;
    Some(digest(&canonical.to_string()))
}

/// Key for the provenance map: the item identity folded into the resource
/// identity, so identical resources rendered for different items never
/// collide.
pub fn path_key(item_id: &str, resource_identity: &str) -> String {
    digest(&format!(
        "uid:{},resource_key:{}",
        item_id, resource_identity
    ))
}

/// Lexically normalize a relative path, folding `.` and `..` components.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Accumulated record of which source path(s) produced which resource
/// identity, plus each item's declared overlay resource list. Constructed
/// once per run and shared across all concurrently hydrating items.
#[derive(Debug, Default)]
pub struct ProvenanceTracker {
    uid_to_path: Mutex<HashMap<String, BTreeSet<PathBuf>>>,
    overlay_resources: Mutex<HashMap<String, Vec<PathBuf>>>,
    overlays_dir: String,
}

impl ProvenanceTracker {
    /// `overlays_dir` is the overlay root's directory name, used to decide
    /// whether a resource-list document belongs to an overlay.
    pub fn new(overlays_dir: impl Into<String>) -> Self {
        Self {
            uid_to_path: Mutex::default(),
            overlay_resources: Mutex::default(),
            overlays_dir: overlays_dir.into(),
        }
    }

    /// Process the documents of one staged source file.
    ///
    /// Valid resources are annotated with their identity and recorded under
    /// `(item_id, identity)`. A resource-list document under the overlays
    /// root records the item's overlay resource list and is dropped from the
    /// output. Returns the re-serialized documents, or None when the file
    /// yielded no resources (the caller keeps the original content then).
    pub fn record_documents(
        &self,
        content: &str,
        rel_path: &Path,
        item_id: &str,
    ) -> Result<Option<String>, ItemError> {
        let yaml_err = |source| ItemError::Yaml {
            path: rel_path.to_path_buf(),
            source,
        };

        let docs = parse_documents(content).map_err(yaml_err)?;
        let mut processed: Vec<Value> = Vec::new();

        for mut doc in docs {
            if !is_valid_resource(&doc) {
                debug!(
                    "ignoring document in {}: not a structured resource",
                    rel_path.display()
                );
                continue;
            }

            let Some(identity) = resource_identity(&doc) else {
                warn!(
                    "skipping document in {}: could not canonicalize",
                    rel_path.display()
                );
                continue;
            };

            if doc_kind(&doc) == Some(RESOURCE_LIST_KIND) {
                if self.under_overlays_root(rel_path) {
                    self.record_overlay_resources(&doc, rel_path, item_id);
                }
                continue;
            }

            set_annotation(&mut doc, PROVENANCE_ANNOTATION, &identity);

            let key = path_key(item_id, &identity);
            self.uid_to_path
                .lock()
                .entry(key)
                .or_default()
                .insert(rel_path.to_path_buf());

            processed.push(doc);
        }

        if processed.is_empty() {
            return Ok(None);
        }
        dump_documents(&processed, true).map(Some).map_err(yaml_err)
    }

    /// Resolve a build-output document back to the source path that owns it.
    ///
    /// A single recorded path wins outright; with several candidates the one
    /// lying under the item's overlay resource list is chosen; with none
    /// matching the document stays unresolved.
    pub fn resolve_path(&self, doc: &Value, item_id: &str) -> Option<PathBuf> {
        let identity = resource_identity(doc)?;
        let key = path_key(item_id, &identity);

        let uid_to_path = self.uid_to_path.lock();
        let candidates = uid_to_path.get(&key)?;
        if candidates.len() == 1 {
            return candidates.iter().next().cloned();
        }

        candidates
            .iter()
            .find(|path| self.in_overlay_paths(path, item_id))
            .cloned()
    }

    fn under_overlays_root(&self, path: &Path) -> bool {
        path.components().any(|c| match c {
            Component::Normal(name) => name.to_string_lossy() == self.overlays_dir,
            _ => false,
        })
    }

    fn record_overlay_resources(&self, doc: &Value, rel_path: &Path, item_id: &str) {
        let parent = rel_path.parent().unwrap_or_else(|| Path::new(""));
        let resources: Vec<PathBuf> = doc
            .get("resources")
            .and_then(Value::as_sequence)
            .map(|seq| {
                seq.iter()
                    .filter_map(Value::as_str)
                    .map(|r| normalize_path(&parent.join(r)))
                    .collect()
            })
            .unwrap_or_default();

        debug!(
            "recorded {} overlay resources for '{}'",
            resources.len(),
            item_id
        );
        self.overlay_resources
            .lock()
            .insert(item_id.to_string(), resources);
    }

    /// Path-suffix heuristic for overlay membership: a candidate's parent
    /// components must equal the tail of some overlay resource entry,
    /// aligned at the first component they share.
    fn in_overlay_paths(&self, path: &Path, item_id: &str) -> bool {
        let path_parts: Vec<_> = path
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .components()
            .collect();
        let Some(first) = path_parts.first() else {
            return false;
        };

        let overlay_resources = self.overlay_resources.lock();
        let Some(entries) = overlay_resources.get(item_id) else {
            return false;
        };

        for entry in entries {
            let entry_parts: Vec<_> = entry.components().collect();
            let Some(idx) = entry_parts.iter().position(|c| c == first) else {
                continue;
            };
            if entry_parts[idx..] == path_parts[..] {
                return true;
            }
        }
        false
    }
}
