//! StickerForge CLI - batch entry points
//!
//! Commands: optimize, manifest
//! Logs go to stderr, the run summary is JSON on stdout.
//! Exit codes: 0 ok, 1 fatal, 2 some files/packs failed, 64 usage error.

use clap::{ArgGroup, Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use stickerforge_core::{
    catalog::{CatalogOptions, CatalogStage},
    layout::{discover_repo_root, AssetLayout, KNOWN_PROJECT_NAMES},
    manifest::DEFAULT_OBJECT_PREFIX_BASE,
    optimize::{OptimizeOptions, OptimizeStage},
    profiles::{ProfileRegistry, DEFAULT_PROFILE},
};

const EXIT_PARTIAL_FAILURE: u8 = 2;
const EXIT_USAGE: u8 = 64;

#[derive(Parser)]
#[command(name = "stickerforge-cli")]
#[command(about = "StickerForge CLI - sticker optimizer and catalog manifest compiler")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Repo root; discovered from the working directory when omitted
    #[arg(long, global = true, env = "STICKERFORGE_ROOT")]
    root: Option<PathBuf>,

    /// Directory of extra transform profiles (*.json)
    #[arg(long, global = true, env = "STICKERFORGE_PROFILES_DIR")]
    profiles_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Transform staged images into processed variants
    Optimize(OptimizeArgs),

    /// Build batch id, manifest and upload plan for one or all packs
    Manifest(ManifestArgs),
}

#[derive(Args)]
struct OptimizeArgs {
    /// Staged input tree
    #[arg(long)]
    staged: Option<PathBuf>,

    /// Processed output tree
    #[arg(long)]
    processed: Option<PathBuf>,

    /// Transform profile name
    #[arg(long, default_value = DEFAULT_PROFILE)]
    profile: String,

    /// Validate everything, write nothing
    #[arg(long)]
    dry_run: bool,

    /// Stop at the first failing file
    #[arg(long)]
    fail_fast: bool,
}

#[derive(Args)]
#[command(group(ArgGroup::new("target").required(true).args(["pack", "all"])))]
struct ManifestArgs {
    /// One pack index file
    #[arg(long)]
    pack: Option<PathBuf>,

    /// Every *.source.json in the packs directory
    #[arg(long)]
    all: bool,

    /// Build and report, but stage and write nothing
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    processed_root: Option<PathBuf>,

    #[arg(long)]
    packs_dir: Option<PathBuf>,

    #[arg(long)]
    generated_dir: Option<PathBuf>,

    #[arg(long)]
    uploads_dir: Option<PathBuf>,

    #[arg(long, env = "STICKERFORGE_OBJECT_PREFIX_BASE", default_value = DEFAULT_OBJECT_PREFIX_BASE)]
    object_prefix_base: String,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_USAGE } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let root = cli.root.clone();
    let registry = match &cli.profiles_dir {
        Some(dir) => match ProfileRegistry::load_from_dir(dir) {
            Ok(r) => r,
            Err(e) => return fatal(&format!("Failed to load profiles: {e}")),
        },
        None => ProfileRegistry::default(),
    };

    match cli.command {
        Commands::Optimize(args) => optimize(args, root, &registry),
        Commands::Manifest(args) => manifest(args, root, registry),
    }
}

fn optimize(args: OptimizeArgs, root: Option<PathBuf>, registry: &ProfileRegistry) -> ExitCode {
    let Some(profile) = registry.get(&args.profile).cloned() else {
        return fatal(&format!("Unknown profile: {}", args.profile));
    };

    let (staged, processed) = match (args.staged, args.processed) {
        (Some(s), Some(p)) => (s, p),
        (staged, processed) => match resolve_layout(root) {
            Ok(layout) => (
                staged.unwrap_or(layout.staged),
                processed.unwrap_or(layout.processed),
            ),
            Err(msg) => return fatal(&msg),
        },
    };

    let stage = OptimizeStage::new(
        profile,
        OptimizeOptions {
            staged_root: staged,
            processed_root: processed,
            dry_run: args.dry_run,
            fail_fast: args.fail_fast,
        },
    );

    match stage.run() {
        Ok(report) => {
            print_json(&report);
            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_PARTIAL_FAILURE)
            }
        }
        Err(e) => fatal(&e.to_string()),
    }
}

fn manifest(args: ManifestArgs, root: Option<PathBuf>, registry: ProfileRegistry) -> ExitCode {
    let mut layout = match resolve_layout(root) {
        Ok(layout) => layout,
        Err(msg) => return fatal(&msg),
    };
    if let Some(p) = args.processed_root {
        layout.processed = p;
    }
    if let Some(p) = args.packs_dir {
        layout.packs = p;
    }
    if let Some(p) = args.generated_dir {
        layout.generated = p;
    }
    if let Some(p) = args.uploads_dir {
        layout.uploads = p;
    }

    let stage = CatalogStage::new(
        registry,
        CatalogOptions {
            layout,
            object_prefix_base: args.object_prefix_base,
            dry_run: args.dry_run,
        },
    );

    let report = match args.pack {
        Some(pack) => {
            let path = locate_pack(&pack, stage.layout());
            stage.run_single(&path)
        }
        None => match stage.run_all() {
            Ok(report) => report,
            Err(e) => return fatal(&e.to_string()),
        },
    };

    print_json(&report);
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_PARTIAL_FAILURE)
    }
}

/// `--root` wins; otherwise walk upward from the working directory.
fn resolve_layout(root: Option<PathBuf>) -> Result<AssetLayout, String> {
    let root = match root {
        Some(root) => root,
        None => {
            let cwd = std::env::current_dir().map_err(|e| format!("Cannot read working directory: {e}"))?;
            discover_repo_root(&cwd, KNOWN_PROJECT_NAMES).map_err(|e| e.to_string())?
        }
    };
    Ok(AssetLayout::new(root))
}

/// A bare pack name like `cats.source.json` also resolves inside the packs directory.
fn locate_pack(pack: &Path, layout: &AssetLayout) -> PathBuf {
    if pack.exists() || pack.components().count() > 1 {
        return pack.to_path_buf();
    }
    let in_packs = layout.packs.join(pack);
    if in_packs.exists() {
        in_packs
    } else {
        pack.to_path_buf()
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!(error = %e, "could not serialize summary"),
    }
}

fn fatal(message: &str) -> ExitCode {
    tracing::error!("{message}");
    let output = serde_json::json!({
        "success": false,
        "error": message,
    });
    println!("{output}");
    ExitCode::FAILURE
}
