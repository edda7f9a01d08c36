//! Batch hydration of Kubernetes manifests from a tabular source of truth.
//!
//! Each row of the source of truth becomes one hydration unit: its staging
//! tree is composed from a shared base library, a per-group overlay, and
//! optional modules, templates are rendered with the row as context, the
//! tree is flattened with kustomize, and the output is optionally split back
//! into per-source files, validated, and published to an OCI registry.
//! Units fail independently; the run reports every failed stage at the end.

pub mod cache;
pub mod cli;
pub mod compose;
pub mod error;
pub mod hydration;
pub mod item;
pub mod krm;
pub mod logging;
pub mod oci;
pub mod process;
pub mod scheduler;
pub mod sot;
pub mod template;
pub mod validator;
