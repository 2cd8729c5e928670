//! CLI entry point. Dispatches one of the seven commands over
//! `<cache_dir> <root_url>`, each spawning an `EngineHost` and driving it
//! through `run_sync`.

mod autostore;
mod config;
mod engine;
mod error;
mod fetcher;
mod folder;
mod fs;
mod html_parser;
mod later;
mod path;
mod refreshable;
mod single_flight;
mod size_parser;
mod walk;

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::Semaphore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{load_config, EngineConfig};
use crate::engine::{run_sync, EngineHost};
use crate::error::EngineError;
use crate::folder::resolve;
use crate::fs::FsAdapter;
use crate::path::Path;
use crate::walk::{
    approximate_total_size, completeness_report, find_folder, list_special_and_approximate_size_fast,
    prefetch, verify_sizes,
};

#[derive(Parser)]
#[command(name = "autoindex-fuse", about = "Lazy cached virtual filesystem over an HTTP autoindex tree")]
struct Cli {
    /// Local cache directory mirroring the remote tree.
    cache_dir: PathBuf,
    /// Root URL of the remote Apache-style autoindex server.
    root_url: String,
    /// Optional path within the tree the command operates on (default: root).
    #[arg(long, default_value = "")]
    path: String,
    /// Optional `config.toml` overriding the built-in tuning defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mount read-only FUSE at MOUNT. Blocks until externally unmounted.
    FuseMount { mount: PathBuf },
    /// Print a folder contents summary.
    List,
    /// Recursively ensure every file is present.
    Prefetch {
        /// Unlink and re-fetch any locally present file whose size disagrees
        /// with the remote exact size.
        #[arg(long)]
        fix: bool,
    },
    /// Sum approximate sizes across the subtree in parallel.
    DuApproximate,
    /// Compare local file sizes against remote exact sizes; report mismatches.
    CacheDirCheckSizes,
    /// Report the downloaded/expected byte fraction across the subtree.
    WalkCacheCheckDownloadCompletness,
    /// Tree listing grouped by extension, with special-folder tags.
    ListSpecialAndApproximateSizeFast,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "autoindex_fuse=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e:?}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => load_config(path),
        None => EngineConfig::default(),
    };
    let host = EngineHost::spawn(config.clone(), cli.cache_dir.clone(), cli.root_url.clone());
    let target_path = Path::parse(&cli.path);

    let result: Result<(), EngineError> = match cli.command {
        Command::FuseMount { mount } => fuse_mount(host, target_path, &mount),
        Command::List => list(&host, target_path),
        Command::Prefetch { fix } => prefetch_cmd(&host, &config, target_path, fix),
        Command::DuApproximate => du_approximate(&host, &config, target_path),
        Command::CacheDirCheckSizes => cache_dir_check_sizes(&host, target_path),
        Command::WalkCacheCheckDownloadCompletness => completeness(&host, target_path),
        Command::ListSpecialAndApproximateSizeFast => list_special_fast(&host, target_path),
    };
    Ok(result?)
}

fn fuse_mount(host: EngineHost, target_path: Path, mount: &std::path::Path) -> Result<(), EngineError> {
    // Resolve the mount root up front so a bad `--path` fails loudly instead
    // of silently mounting an empty tree.
    run_sync(&host, {
        let target_path = target_path.clone();
        move |root, _engine| async move {
            find_folder(&root, &target_path).await?;
            Ok(())
        }
    })?;

    let adapter = FsAdapter::new(host, target_path);
    let options = vec![
        fuser::MountOption::RO,
        fuser::MountOption::AutoUnmount,
        fuser::MountOption::FSName("autoindex-fuse".to_string()),
    ];
    tracing::info!(mount = %mount.display(), "mounting read-only FUSE filesystem");
    fuser::mount2(adapter, mount, &options).map_err(EngineError::from)
}

fn list(host: &EngineHost, target_path: Path) -> Result<(), EngineError> {
    run_sync(host, move |root, _engine| async move {
        let folder = find_folder(&root, &target_path).await?;
        let children = folder.children().await?;
        let mut folders: Vec<&String> = children.folders.keys().collect();
        folders.sort();
        for name in folders {
            println!("{name}/");
        }
        let mut files: Vec<&String> = children.files.iter().collect();
        files.sort();
        for name in files {
            let size = folder.approximate_size(name).await?;
            println!("{name}\t{size}");
        }
        Ok(())
    })
}

fn prefetch_cmd(host: &EngineHost, config: &EngineConfig, target_path: Path, fix: bool) -> Result<(), EngineError> {
    let width = config.traversal_semaphore_width;
    run_sync(host, move |root, _engine| async move {
        let folder = find_folder(&root, &target_path).await?;
        let semaphore = Arc::new(Semaphore::new(width));
        let errors = Rc::new(RefCell::new(Vec::new()));
        prefetch(folder, semaphore, errors.clone(), fix).await?;
        report_errors(&errors.borrow());
        Ok(())
    })
}

fn du_approximate(host: &EngineHost, config: &EngineConfig, target_path: Path) -> Result<(), EngineError> {
    let width = config.traversal_semaphore_width;
    run_sync(host, move |root, _engine| async move {
        let folder = find_folder(&root, &target_path).await?;
        let semaphore = Arc::new(Semaphore::new(width));
        let total = approximate_total_size(folder, semaphore).await?;
        println!("{total} bytes ({:.2} MiB)", total as f64 / (1024.0 * 1024.0));
        Ok(())
    })
}

fn cache_dir_check_sizes(host: &EngineHost, target_path: Path) -> Result<(), EngineError> {
    run_sync(host, move |root, _engine| async move {
        let folder = find_folder(&root, &target_path).await?;
        let errors = Rc::new(RefCell::new(Vec::new()));
        verify_sizes(folder, errors.clone()).await?;
        report_errors(&errors.borrow());
        Ok(())
    })
}

fn completeness(host: &EngineHost, target_path: Path) -> Result<(), EngineError> {
    run_sync(host, move |root, _engine| async move {
        let folder = find_folder(&root, &target_path).await?;
        let (downloaded, expected) = completeness_report(folder).await?;
        let fraction = if expected == 0 { 1.0 } else { downloaded as f64 / expected as f64 };
        println!("{downloaded}/{expected} bytes ({:.2}%)", fraction * 100.0);
        Ok(())
    })
}

fn list_special_fast(host: &EngineHost, target_path: Path) -> Result<(), EngineError> {
    run_sync(host, move |root, _engine| async move {
        let folder = resolve(&root, &target_path).await?;
        list_special_and_approximate_size_fast(folder, 0).await
    })
}

fn report_errors(errors: &[walk::TraversalError]) {
    if errors.is_empty() {
        return;
    }
    eprintln!("{} error(s):", errors.len());
    for e in errors {
        eprintln!("  {}: {}", e.path, e.message);
    }
}
