//! End-to-end runs over real fixture trees with the stub build tool.

use super::test_utils::*;
use hydrate::error::FatalError;
use std::fs;
use tempfile::TempDir;

#[tokio::test]
async fn test_full_run_hydrates_every_cluster() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let _path = stub_tools(root);

    write_sources(root, &["prod", "dev"]);
    let sot = write_cluster_sot(
        root,
        &[("c1", "prod", ""), ("c2", "prod", ""), ("c3", "dev", "")],
    );

    let code = run_cli(&cluster_args(root, &sot, &[])).await.unwrap();
    assert_eq!(code, 0);

    for (name, group) in [("c1", "prod"), ("c2", "prod"), ("c3", "dev")] {
        let manifest = root.join("output").join(group).join(format!("{name}.yaml"));
        let contents = fs::read_to_string(&manifest).unwrap();
        assert!(contents.contains(&format!("name: {name}-config")));
        assert!(contents.contains(&format!("group: {group}")));
    }
}

#[tokio::test]
async fn test_tag_selection_hydrates_only_matching() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let _path = stub_tools(root);

    write_sources(root, &["prod"]);
    let rows: Vec<(String, String, String)> = (0..50)
        .map(|i| {
            let tags = if i == 7 || i == 31 { "canary" } else { "stable" };
            (format!("c{i:02}"), "prod".to_string(), tags.to_string())
        })
        .collect();
    let borrowed: Vec<(&str, &str, &str)> = rows
        .iter()
        .map(|(n, g, t)| (n.as_str(), g.as_str(), t.as_str()))
        .collect();
    let sot = write_cluster_sot(root, &borrowed);

    let code = run_cli(&cluster_args(root, &sot, &["--cluster-tag", "canary"]))
        .await
        .unwrap();
    assert_eq!(code, 0);

    let hydrated: Vec<String> = fs::read_dir(root.join("output/prod"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(hydrated.len(), 2);
    assert!(hydrated.contains(&"c07.yaml".to_string()));
    assert!(hydrated.contains(&"c31.yaml".to_string()));
}

#[tokio::test]
async fn test_template_failure_isolates_one_item() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let _path = stub_tools(root);

    write_sources(root, &["prod"]);
    // the "broken" group's overlay carries a template that cannot parse
    write_file(
        root,
        "overlays/broken/kustomization.yaml",
        "apiVersion: kustomize.config.k8s.io/v1beta1\n\
         kind: Kustomization\n\
         resources:\n  - app.yaml\n",
    );
    write_file(root, "overlays/broken/app.yaml.j2", "{% if %}");

    let sot = write_cluster_sot(root, &[("good", "prod", ""), ("bad", "broken", "")]);
    let code = run_cli(&cluster_args(root, &sot, &[])).await.unwrap();
    assert_eq!(code, 1);

    assert!(root.join("output/prod/good.yaml").is_file());
    assert!(!root.join("output/broken/bad.yaml").exists());
}

#[tokio::test]
async fn test_empty_required_field_skips_row() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let _path = stub_tools(root);

    write_sources(root, &["prod"]);
    let sot = write_cluster_sot(root, &[("c1", "prod", ""), ("", "prod", "")]);

    let code = run_cli(&cluster_args(root, &sot, &[])).await.unwrap();
    assert_eq!(code, 0);
    assert!(root.join("output/prod/c1.yaml").is_file());
}

#[tokio::test]
async fn test_missing_base_path_is_fatal() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let _path = stub_tools(root);

    // overlays exist but the base library does not
    write_file(root, "overlays/prod/kustomization.yaml", "resources: []\n");
    let sot = write_cluster_sot(root, &[("c1", "prod", "")]);

    let err = run_cli(&cluster_args(root, &sot, &[])).await.unwrap_err();
    assert!(matches!(err, FatalError::InvalidPath(_)));
}

#[tokio::test]
async fn test_missing_build_tool_is_fatal() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let _path = no_tools(root);

    write_sources(root, &["prod"]);
    let sot = write_cluster_sot(root, &[("c1", "prod", "")]);

    let err = run_cli(&cluster_args(root, &sot, &[])).await.unwrap_err();
    assert!(matches!(err, FatalError::ToolNotFound(tool) if tool == "kustomize"));
}

#[tokio::test]
async fn test_validation_and_publish_stages_run() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let _path = stub_tools(root);
    install_stub(root, "gator", "#!/bin/sh\nexit 0\n");
    install_stub(root, "oras", "#!/bin/sh\nexit 0\n");

    write_sources(root, &["prod"]);
    write_file(root, "constraints/all/policy.yaml", "kind: K8sPolicy\n");
    let sot = write_cluster_sot(root, &[("c1", "prod", "")]);

    let constraints = root.join("constraints").display().to_string();
    let code = run_cli(&cluster_args(
        root,
        &sot,
        &[
            "--gatekeeper-validation",
            "--gatekeeper-constraints",
            &constraints,
            "--oci-registry",
            "registry.local/manifests",
        ],
    ))
    .await
    .unwrap();
    assert_eq!(code, 0);
    assert!(root.join("output/prod/c1.yaml").is_file());
}

#[tokio::test]
async fn test_failing_validator_fails_item_but_not_build() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let _path = stub_tools(root);
    install_stub(root, "gator", "#!/bin/sh\nexit 1\n");

    write_sources(root, &["prod"]);
    write_file(root, "constraints/policy.yaml", "kind: K8sPolicy\n");
    let sot = write_cluster_sot(root, &[("c1", "prod", "")]);

    let constraints = root.join("constraints").display().to_string();
    let code = run_cli(&cluster_args(
        root,
        &sot,
        &["--gatekeeper-validation", "--gatekeeper-constraints", &constraints],
    ))
    .await
    .unwrap();
    assert_eq!(code, 1);
    // the build itself succeeded; only validation failed
    assert!(root.join("output/prod/c1.yaml").is_file());
}

#[tokio::test]
async fn test_unresolvable_overlay_fails_preflight() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let _path = stub_tools(root);

    // base library exists but the overlays root is empty and no default
    // overlay is configured, so the item has nothing to resolve against
    write_file(
        root,
        "base_library/ns.yaml",
        "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: apps\n",
    );
    std::fs::create_dir_all(root.join("overlays")).unwrap();
    let sot = write_cluster_sot(root, &[("c1", "prod", "")]);

    let code = run_cli(&cluster_args(root, &sot, &[])).await.unwrap();
    assert_eq!(code, 1);
    assert!(!root.join("output/prod/c1.yaml").exists());
}

#[tokio::test]
async fn test_default_overlay_stands_in() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let _path = stub_tools(root);

    // only a "default" overlay exists; the item's group has none
    write_sources(root, &["default"]);
    let sot = write_cluster_sot(root, &[("c1", "prod", "")]);

    let code = run_cli(&cluster_args(
        root,
        &sot,
        &["--default-overlay", "default"],
    ))
    .await
    .unwrap();
    assert_eq!(code, 0);
    // output still lands under the item's group, not the overlay's name
    let contents = fs::read_to_string(root.join("output/prod/c1.yaml")).unwrap();
    assert!(contents.contains("name: c1-config"));
}
