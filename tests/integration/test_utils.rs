//! Shared fixtures for end-to-end pipeline tests.
//!
//! Real kustomize is not assumed on test machines; a stub that concatenates
//! the staged overlay's manifests into the `-o` target stands in for it.
//! The stub preserves everything the pipeline cares about: the working
//! directory contract, the output flag, and the staged file contents
//! (including provenance annotations in split mode).

use clap::Parser;
use hydrate::cli::Cli;
use hydrate::error::FatalError;
use parking_lot::{Mutex, MutexGuard};
use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// PATH is process-global; tests that rewrite it take this lock.
static ENV_MUTEX: Mutex<()> = Mutex::new(());

const KUSTOMIZE_STUB: &str = r#"#!/bin/sh
# test stand-in for kustomize: flatten the cwd's manifests into the -o target
out=""
prev=""
for a in "$@"; do
    if [ "$prev" = "-o" ]; then out="$a"; fi
    prev="$a"
done
: > "$out"
for f in *.yaml; do
    [ -e "$f" ] || continue
    [ "$f" = "kustomization.yaml" ] && continue
    first=$(head -c 3 "$f")
    if [ "$first" != "---" ]; then printf -- '---\n' >> "$out"; fi
    cat "$f" >> "$out"
done
"#;

/// Restores the original PATH (and releases the env lock) when dropped.
pub struct PathGuard {
    saved: Option<OsString>,
    _lock: MutexGuard<'static, ()>,
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        match &self.saved {
            Some(path) => std::env::set_var("PATH", path),
            None => std::env::remove_var("PATH"),
        }
    }
}

fn prepend_path(dir: &Path) -> PathGuard {
    let lock = ENV_MUTEX.lock();
    let saved = std::env::var_os("PATH");
    let mut paths = vec![dir.to_path_buf()];
    if let Some(existing) = &saved {
        paths.extend(std::env::split_paths(existing));
    }
    let joined = std::env::join_paths(paths).unwrap();
    std::env::set_var("PATH", joined);
    PathGuard { saved, _lock: lock }
}

/// Install an executable stub named `name` into the test bin directory.
pub fn install_stub(root: &Path, name: &str, script: &str) {
    let bin = root.join("bin");
    fs::create_dir_all(&bin).unwrap();
    let path = bin.join(name);
    fs::write(&path, script).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
}

/// Install the kustomize stub into `dir` and put it first on PATH.
pub fn stub_tools(dir: &Path) -> PathGuard {
    install_stub(dir, "kustomize", KUSTOMIZE_STUB);
    prepend_path(&dir.join("bin"))
}

/// Put an empty directory first on PATH (and nothing else), so required
/// tools are absent.
pub fn no_tools(dir: &Path) -> PathGuard {
    let bin = dir.join("empty-bin");
    fs::create_dir_all(&bin).unwrap();
    let lock = ENV_MUTEX.lock();
    let saved = std::env::var_os("PATH");
    std::env::set_var("PATH", &bin);
    PathGuard { saved, _lock: lock }
}

pub fn write_file(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// Write a cluster source of truth from (name, group, tags) rows.
pub fn write_cluster_sot(root: &Path, rows: &[(&str, &str, &str)]) -> PathBuf {
    let mut csv = String::from("cluster_name,cluster_group,cluster_tags\n");
    for (name, group, tags) in rows {
        csv.push_str(&format!("{name},{group},\"{tags}\"\n"));
    }
    let path = root.join("sot.csv");
    fs::write(&path, csv).unwrap();
    path
}

/// Lay down a base library plus one templated overlay per group.
pub fn write_sources(root: &Path, groups: &[&str]) {
    write_file(
        root,
        "base_library/ns.yaml",
        "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: apps\n",
    );
    for group in groups {
        write_file(
            root,
            &format!("overlays/{group}/kustomization.yaml"),
            "apiVersion: kustomize.config.k8s.io/v1beta1\n\
             kind: Kustomization\n\
             resources:\n  - app.yaml\n",
        );
        write_file(
            root,
            &format!("overlays/{group}/app.yaml.j2"),
            "apiVersion: v1\n\
             kind: ConfigMap\n\
             metadata:\n  name: {{ cluster_name }}-config\n\
             data:\n  group: {{ cluster_group }}\n",
        );
    }
}

/// Parse and run the CLI exactly as the binary would.
pub async fn run_cli(args: &[String]) -> Result<i32, FatalError> {
    Cli::parse_from(args).run().await
}

/// Baseline `hydrate cluster` invocation against fixtures under `root`.
pub fn cluster_args(root: &Path, sot: &Path, extra: &[&str]) -> Vec<String> {
    let mut args = vec![
        "hydrate".to_string(),
        "cluster".to_string(),
        sot.display().to_string(),
        "--base".to_string(),
        root.join("base_library").display().to_string(),
        "--overlay".to_string(),
        root.join("overlays").display().to_string(),
        "--hydrated".to_string(),
        root.join("output").display().to_string(),
        "--temp".to_string(),
        root.join("tmp").display().to_string(),
    ];
    args.extend(extra.iter().map(|s| s.to_string()));
    args
}
