//! Command-line interface.
//!
//! Two subcommands, one per hydration kind, sharing a common argument block.
//! Run-level problems (bad paths, missing tools, a malformed source of
//! truth) surface as [`FatalError`] before any item hydrates; per-item
//! failures only shape the exit code through the run report.

use crate::cache::FileCache;
use crate::compose::{SourceLayout, TreeComposer};
use crate::error::FatalError;
use crate::hydration::{HydrationUnit, OutputSubdir, SharedConfig};
use crate::item::HydrateType;
use crate::krm::ProvenanceTracker;
use crate::oci::{OciClient, OrasClient};
use crate::process::find_in_path;
use crate::scheduler::{self, RunReport};
use crate::sot::{load_sot, Selector};
use crate::template::TemplateEngine;
use crate::validator::{Gatekeeper, Validator};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    name = "hydrate",
    about = "Batch-render Kubernetes manifests from a tabular source of truth",
    version
)]
pub struct Cli {
    /// Increase log verbosity (-v for debug, -vv for trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log errors only.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Number of concurrent hydration workers; 0 hydrates sequentially.
    #[arg(short, long, default_value_t = 0, global = true)]
    pub workers: usize,

    /// Seconds a single kustomize build may run before being killed.
    #[arg(long, default_value_t = 300, value_name = "SECONDS", global = true)]
    pub build_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Hydrate one manifest set per cluster.
    Cluster(ClusterArgs),
    /// Hydrate one manifest set per deployment group.
    Group(GroupArgs),
}

/// Arguments shared by both hydration kinds.
#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Source-of-truth CSV file.
    pub sot_file: PathBuf,

    /// Base manifest library directory.
    #[arg(short, long, default_value = "base_library")]
    pub base: PathBuf,

    /// Root directory holding per-group overlays.
    #[arg(short, long, default_value = "overlays")]
    pub overlay: PathBuf,

    /// Overlay directory to fall back on when a group has none.
    #[arg(short = 'O', long)]
    pub default_overlay: Option<String>,

    /// Optional modules directory, staged inside the base library.
    #[arg(short, long, default_value = "modules")]
    pub modules: PathBuf,

    /// Destination root for hydrated output.
    #[arg(short = 'y', long, default_value = "output")]
    pub hydrated: PathBuf,

    /// Registry to publish packaged artifacts to; publishing is skipped
    /// when unset.
    #[arg(long, value_name = "URL")]
    pub oci_registry: Option<String>,

    /// Tags applied to published artifacts.
    #[arg(long, default_value = "latest", value_delimiter = ',')]
    pub oci_tags: Vec<String>,

    /// Validate hydrated output with gatekeeper.
    #[arg(long)]
    pub gatekeeper_validation: bool,

    /// Constraint paths for gatekeeper validation; may repeat.
    #[arg(long, value_name = "PATH")]
    pub gatekeeper_constraints: Vec<PathBuf>,

    /// Parent directory for per-item staging trees; system temp when unset.
    #[arg(short, long)]
    pub temp: Option<PathBuf>,

    /// Keep staging trees after the run instead of removing them.
    #[arg(long)]
    pub preserve_temp: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SubdirArg {
    Group,
    Cluster,
    None,
}

impl From<SubdirArg> for OutputSubdir {
    fn from(arg: SubdirArg) -> Self {
        match arg {
            SubdirArg::Group => OutputSubdir::Group,
            SubdirArg::Cluster => OutputSubdir::Cluster,
            SubdirArg::None => OutputSubdir::None,
        }
    }
}

#[derive(Debug, Args)]
pub struct ClusterArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// How output is grouped under the hydrated root.
    #[arg(long, value_enum, default_value_t = SubdirArg::Group, conflicts_with = "split_output")]
    pub output_subdir: SubdirArg,

    /// Split build output into one file per source resource.
    #[arg(long)]
    pub split_output: bool,

    /// Hydrate only the named cluster(s); may repeat.
    #[arg(long, conflicts_with_all = ["cluster_tag", "cluster_group"])]
    pub cluster_name: Vec<String>,

    /// Hydrate only clusters carrying one of these tags; may repeat.
    #[arg(long, conflicts_with = "cluster_group")]
    pub cluster_tag: Vec<String>,

    /// Hydrate only clusters in the named group(s); may repeat.
    #[arg(long)]
    pub cluster_group: Vec<String>,
}

#[derive(Debug, Args)]
pub struct GroupArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Split build output into one file per source resource.
    #[arg(long)]
    pub split_output: bool,

    /// Hydrate only the named group(s); may repeat.
    #[arg(long, conflicts_with = "tag")]
    pub group: Vec<String>,

    /// Hydrate only groups carrying one of these tags; may repeat.
    #[arg(long)]
    pub tag: Vec<String>,
}

fn require_dir(path: &Path) -> Result<(), FatalError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(FatalError::InvalidPath(path.to_path_buf()))
    }
}

fn require_tool(name: &str) -> Result<(), FatalError> {
    find_in_path(name)
        .map(|_| ())
        .ok_or_else(|| FatalError::ToolNotFound(name.to_string()))
}

impl Cli {
    /// Run the selected subcommand to completion and yield the process exit
    /// code: 0 clean, 1 with item failures.
    pub async fn run(self) -> Result<i32, FatalError> {
        let (kind, common, output_subdir, split_output, selector) = match self.command {
            Command::Cluster(args) => (
                HydrateType::Cluster,
                args.common,
                args.output_subdir.into(),
                args.split_output,
                Selector {
                    names: args.cluster_name.into_iter().collect(),
                    tags: args.cluster_tag.into_iter().collect(),
                    groups: args.cluster_group.into_iter().collect(),
                },
            ),
            Command::Group(args) => (
                HydrateType::Group,
                args.common,
                OutputSubdir::None,
                args.split_output,
                Selector {
                    names: args.group.into_iter().collect(),
                    tags: args.tag.into_iter().collect(),
                    groups: Default::default(),
                },
            ),
        };

        require_dir(&common.base)?;
        require_dir(&common.overlay)?;
        require_tool("kustomize")?;
        if common.oci_registry.is_some() {
            require_tool("oras")?;
        }
        if common.gatekeeper_validation {
            require_tool("gator")?;
        }

        let config = load_sot(&common.sot_file, kind)?;
        let selected = selector.select(config);
        if selected.is_empty() {
            info!("no items selected; nothing to hydrate");
            return Ok(0);
        }

        let mut validators: Vec<Arc<dyn Validator>> = Vec::new();
        if common.gatekeeper_validation {
            validators.push(Arc::new(Gatekeeper::new(
                common.gatekeeper_constraints.clone(),
            )?));
        }
        let oci: Option<Arc<dyn OciClient>> = common
            .oci_registry
            .as_deref()
            .map(|url| Arc::new(OrasClient::new(url)) as Arc<dyn OciClient>);

        let layout = SourceLayout {
            base_path: common.base.clone(),
            modules_path: common.modules.clone(),
            overlays_name: common
                .overlay
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "overlays".to_string()),
        };
        let tracker = split_output.then(|| {
            Arc::new(ProvenanceTracker::new(layout.overlays_name.clone()))
        });
        let composer = TreeComposer::new(
            Arc::new(FileCache::new()),
            Arc::new(TemplateEngine::new()),
            tracker.clone(),
        );

        let shared = Arc::new(SharedConfig {
            layout,
            overlays_path: common.overlay,
            default_overlay: common.default_overlay,
            hydrated_path: common.hydrated,
            output_subdir,
            split_output,
            build_timeout: Duration::from_secs(self.build_timeout),
            temp_root: common.temp,
            preserve_temp: common.preserve_temp,
            composer,
            tracker,
            validators,
            oci,
            oci_tags: common.oci_tags,
        });

        let units: Vec<HydrationUnit> = selected
            .into_values()
            .map(|item| HydrationUnit::new(item, Arc::clone(&shared)))
            .collect();

        let report: RunReport = scheduler::run_units(units, self.workers).await;
        println!("{}", report.summary());
        Ok(report.exit_code())
    }
}
