//! Worker-pool runs must produce the same output tree as sequential runs.

use super::test_utils::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use walkdir::WalkDir;

fn tree_contents(root: &Path) -> BTreeMap<String, String> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e
                .path()
                .strip_prefix(root)
                .unwrap()
                .display()
                .to_string();
            (rel, fs::read_to_string(e.path()).unwrap())
        })
        .collect()
}

#[tokio::test]
async fn test_parallel_run_matches_sequential() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let _path = stub_tools(root);

    write_sources(root, &["prod", "dev"]);
    let rows: Vec<(String, String, String)> = (0..6)
        .map(|i| {
            let group = if i % 2 == 0 { "prod" } else { "dev" };
            (format!("c{i}"), group.to_string(), String::new())
        })
        .collect();
    let borrowed: Vec<(&str, &str, &str)> = rows
        .iter()
        .map(|(n, g, t)| (n.as_str(), g.as_str(), t.as_str()))
        .collect();
    let sot = write_cluster_sot(root, &borrowed);

    let run = |hydrated: &str, workers: &'static str| {
        let args = vec![
            "hydrate".to_string(),
            "--workers".to_string(),
            workers.to_string(),
            "cluster".to_string(),
            sot.display().to_string(),
            "--base".to_string(),
            root.join("base_library").display().to_string(),
            "--overlay".to_string(),
            root.join("overlays").display().to_string(),
            "--hydrated".to_string(),
            root.join(hydrated).display().to_string(),
            "--temp".to_string(),
            root.join("tmp").join(hydrated).display().to_string(),
        ];
        args
    };

    let sequential = run("out-seq", "0");
    let parallel = run("out-par", "4");

    assert_eq!(run_cli(&sequential).await.unwrap(), 0);
    assert_eq!(run_cli(&parallel).await.unwrap(), 0);

    let seq_tree = tree_contents(&root.join("out-seq"));
    let par_tree = tree_contents(&root.join("out-par"));
    assert_eq!(seq_tree.len(), 6);
    assert_eq!(seq_tree, par_tree);
}
